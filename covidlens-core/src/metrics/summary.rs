//! Per-country summary statistics.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::correlation::{lag_correlation, scan_lags, LagCorrelation};
use super::MetricsConfig;
use crate::domain::CountrySeries;

/// A value together with the date it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dated<T> {
    pub date: NaiveDate,
    pub value: T,
}

impl<T> From<(NaiveDate, T)> for Dated<T> {
    fn from((date, value): (NaiveDate, T)) -> Self {
        Self { date, value }
    }
}

/// Summary of one country's merged series. "Latest" means the most recent
/// non-missing value, which may predate `last_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountrySummary {
    pub country: String,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub records: usize,
    pub population: Option<u64>,
    pub latest_confirmed: Option<Dated<u64>>,
    pub latest_deaths: Option<Dated<u64>>,
    pub latest_cases_per_100k: Option<Dated<f64>>,
    pub latest_deaths_per_100k: Option<Dated<f64>>,
    pub latest_vaccination_rate: Option<Dated<f64>>,
    pub latest_fully_vaccinated_per_hundred: Option<Dated<f64>>,
    /// Highest rolling-average new cases.
    pub peak_new_cases_avg: Option<Dated<f64>>,
    pub mean_stringency: Option<f64>,
    pub lag_correlation: LagCorrelation,
    pub best_lag: Option<LagCorrelation>,
}

impl CountrySummary {
    /// Summarize an enriched series. `None` for an empty series.
    pub fn from_series(series: CountrySeries<'_>, config: &MetricsConfig) -> Option<Self> {
        let (first_date, last_date) = (series.first_date()?, series.last_date()?);
        let records = series.records();

        let peak_new_cases_avg = records
            .iter()
            .filter_map(|r| r.derived.new_cases_rolling_avg.map(|v| Dated { date: r.date, value: v }))
            .fold(None, |best: Option<Dated<f64>>, d| match best {
                Some(b) if b.value >= d.value => Some(b),
                _ => Some(d),
            });

        let stringency: Vec<f64> = records.iter().filter_map(|r| r.stringency_index).collect();
        let mean_stringency =
            (!stringency.is_empty()).then(|| stringency.iter().sum::<f64>() / stringency.len() as f64);

        Some(Self {
            country: series.country().to_string(),
            first_date,
            last_date,
            records: records.len(),
            population: records.iter().find_map(|r| r.population),
            latest_confirmed: series.latest(|r| r.confirmed).map(Dated::from),
            latest_deaths: series.latest(|r| r.deaths).map(Dated::from),
            latest_cases_per_100k: series.latest(|r| r.derived.cases_per_100k).map(Dated::from),
            latest_deaths_per_100k: series.latest(|r| r.derived.deaths_per_100k).map(Dated::from),
            latest_vaccination_rate: series.latest(|r| r.derived.vaccination_rate).map(Dated::from),
            latest_fully_vaccinated_per_hundred: series
                .latest(|r| r.people_fully_vaccinated_per_hundred)
                .map(Dated::from),
            peak_new_cases_avg,
            mean_stringency,
            lag_correlation: lag_correlation(series, config.lag_days, config.min_observations),
            best_lag: scan_lags(series, config.max_lag_scan, config.min_observations),
        })
    }
}
