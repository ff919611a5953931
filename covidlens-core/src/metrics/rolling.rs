//! Trailing moving average over consecutive calendar days.
//!
//! A window is valid only when it covers `window` consecutive days that are
//! all present and all non-missing. A gap in the dates or a `None` inside the
//! window yields `None`; nothing is filled in.

use chrono::NaiveDate;

/// Trailing mean of `values[i + 1 - window ..= i]` for each `i`.
///
/// `dates` must be strictly ascending and the same length as `values`.
pub fn rolling_mean(dates: &[NaiveDate], values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    debug_assert_eq!(dates.len(), values.len());
    let n = values.len();
    let mut result = vec![None; n];
    if window == 0 || n < window {
        return result;
    }
    let span = (window - 1) as i64;

    for i in (window - 1)..n {
        let start = i + 1 - window;
        if (dates[i] - dates[start]).num_days() != span {
            continue;
        }
        let sum: Option<f64> = values[start..=i].iter().copied().sum();
        result[i] = sum.map(|s| s / window as f64);
    }
    result
}
