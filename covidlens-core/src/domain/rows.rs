//! Per-source rows, one per `(country, date)`.
//!
//! Every numeric field is an `Option`: a blank cell stays `None` all the way
//! to the exported file. Nothing in the pipeline substitutes zero.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::SourceKey;

/// A loaded source: one row per key, sorted by `(country, date)`.
pub type SourceTable<T> = BTreeMap<SourceKey, T>;

/// Cumulative case and death counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRow {
    pub confirmed: Option<u64>,
    pub deaths: Option<u64>,
    /// Only the Johns Hopkins layout reports recoveries.
    pub recovered: Option<u64>,
}

impl CaseRow {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_none() && self.deaths.is_none() && self.recovered.is_none()
    }
}

/// Vaccination progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VaccinationRow {
    /// Cumulative doses administered.
    pub doses_administered: Option<f64>,
    /// Share of the population fully vaccinated, in percent.
    pub people_fully_vaccinated_per_hundred: Option<f64>,
}

/// Government response stringency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyRow {
    /// Oxford stringency index, in `[0, 100]` when present.
    pub stringency_index: Option<f64>,
}

/// Inclusive bounds of the stringency index.
pub const STRINGENCY_RANGE: (f64, f64) = (0.0, 100.0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_case_row_has_no_measures() {
        assert!(CaseRow::default().is_empty());
        let row = CaseRow {
            deaths: Some(0),
            ..CaseRow::default()
        };
        assert!(!row.is_empty());
    }
}
