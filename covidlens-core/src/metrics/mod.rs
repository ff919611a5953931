//! Derived metrics over the merged table.
//!
//! Every metric is computed within one country's date-ascending run of
//! records; nothing crosses a country boundary. Inputs that are missing make
//! the metric missing.

pub mod correlation;
pub mod rolling;
pub mod summary;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::data::Warning;
use crate::domain::{MergedRecord, MergedTable};

pub use correlation::{lag_correlation, pearson, scan_lags, CorrelationMatrix, LagCorrelation, MatrixVariable};
pub use rolling::rolling_mean;
pub use summary::{CountrySummary, Dated};

const PER_100K: f64 = 100_000.0;

/// Largest lag, in days, a configuration may ask for.
pub const MAX_LAG_DAYS: u32 = 730;

/// Tunables of the metrics stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Days between a stringency value and the case figure it is paired with.
    pub lag_days: u32,
    /// Complete pairs required before a correlation is reported.
    pub min_observations: usize,
    pub rolling_window: usize,
    /// Vaccination rates above this are clamped and flagged.
    pub vaccination_upper_bound: f64,
    /// Largest lag tried by the lag scan.
    pub max_lag_scan: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            lag_days: 14,
            min_observations: 30,
            rolling_window: 7,
            vaccination_upper_bound: 1.0,
            max_lag_scan: 28,
        }
    }
}

/// Everything the metrics stage produces.
#[derive(Debug, Clone)]
pub struct MetricsOutput {
    pub table: MergedTable,
    pub summaries: Vec<CountrySummary>,
    pub correlations: CorrelationMatrix,
    pub warnings: Vec<Warning>,
}

/// Enrich the table, then summarize it.
pub fn compute_metrics(table: MergedTable, config: &MetricsConfig) -> MetricsOutput {
    let (table, mut warnings) = enrich(table, config);

    let summaries: Vec<CountrySummary> = table
        .series()
        .into_iter()
        .filter_map(|series| CountrySummary::from_series(series, config))
        .collect();

    for s in &summaries {
        if !s.lag_correlation.is_defined() {
            warnings.push(Warning::InsufficientData {
                country: s.country.clone(),
                metric: format!("stringency (lag {}d) vs new cases per 100k", s.lag_correlation.lag_days),
                observed: s.lag_correlation.observations,
                required: config.min_observations,
            });
        }
    }

    let correlations = CorrelationMatrix::compute(&table, &MatrixVariable::ALL, config.min_observations);
    let defined = summaries.iter().filter(|s| s.lag_correlation.is_defined()).count();
    tracing::info!(
        countries = summaries.len(),
        lag_correlations = defined,
        matrix_rows = correlations.observations,
        "computed metrics"
    );

    MetricsOutput {
        table,
        summaries,
        correlations,
        warnings,
    }
}

/// Fill `derived` on every record.
pub fn enrich(mut table: MergedTable, config: &MetricsConfig) -> (MergedTable, Vec<Warning>) {
    let mut warnings = Vec::new();
    for chunk in table.country_chunks_mut() {
        if let Some(w) = enrich_country(chunk, config) {
            warnings.push(w);
        }
    }
    (table, warnings)
}

/// Derived metrics for one country's records, in date order.
fn enrich_country(records: &mut [MergedRecord], config: &MetricsConfig) -> Option<Warning> {
    let one_day = Duration::days(1);
    let lag = Duration::days(i64::from(config.lag_days));

    for i in 0..records.len() {
        let previous = i
            .checked_sub(1)
            .map(|p| &records[p])
            .filter(|p| p.date + one_day == records[i].date);
        let new_cases = previous.and_then(|p| difference(records[i].confirmed, p.confirmed));
        let new_deaths = previous.and_then(|p| difference(records[i].deaths, p.deaths));

        let stringency_index_lagged = records[i]
            .date
            .checked_sub_signed(lag)
            .and_then(|lagged| records[..=i].binary_search_by_key(&lagged, |r| r.date).ok())
            .and_then(|j| records[j].stringency_index);

        let r = &mut records[i];
        let population = r.population.filter(|&p| p > 0).map(|p| p as f64);
        let per_100k = |v: Option<f64>| Some(v? / population? * PER_100K);

        let d = &mut r.derived;
        d.new_cases = new_cases;
        d.new_deaths = new_deaths;
        d.cases_per_100k = per_100k(r.confirmed.map(|v| v as f64));
        d.deaths_per_100k = per_100k(r.deaths.map(|v| v as f64));
        d.recovered_per_100k = per_100k(r.recovered.map(|v| v as f64));
        d.new_cases_per_100k = per_100k(new_cases);
        d.new_deaths_per_100k = per_100k(new_deaths);
        d.stringency_index_lagged = stringency_index_lagged;

        let raw_rate = r.doses_administered.zip(population).map(|(doses, p)| doses / p);
        d.vaccination_rate = raw_rate.map(|v| v.clamp(0.0, config.vaccination_upper_bound));
        d.vaccination_rate_capped = raw_rate.is_some_and(|v| v > config.vaccination_upper_bound);
    }

    let dates: Vec<_> = records.iter().map(|r| r.date).collect();
    let new_cases: Vec<_> = records.iter().map(|r| r.derived.new_cases).collect();
    let new_deaths: Vec<_> = records.iter().map(|r| r.derived.new_deaths).collect();
    let cases_avg = rolling_mean(&dates, &new_cases, config.rolling_window);
    let deaths_avg = rolling_mean(&dates, &new_deaths, config.rolling_window);
    for ((r, c), d) in records.iter_mut().zip(cases_avg).zip(deaths_avg) {
        r.derived.new_cases_rolling_avg = c;
        r.derived.new_deaths_rolling_avg = d;
    }

    capped_warning(records, config)
}

/// Signed difference of two cumulative counts; revisions can make it negative.
fn difference(current: Option<u64>, previous: Option<u64>) -> Option<f64> {
    Some(current? as f64 - previous? as f64)
}

fn capped_warning(records: &[MergedRecord], config: &MetricsConfig) -> Option<Warning> {
    let capped: Vec<f64> = records
        .iter()
        .filter(|r| r.derived.vaccination_rate_capped)
        .filter_map(|r| Some(r.doses_administered? / r.population? as f64))
        .collect();
    let first = records.first()?;
    if capped.is_empty() {
        return None;
    }
    let max_value = capped.iter().copied().fold(f64::MIN, f64::max);
    tracing::debug!(country = %first.country, records = capped.len(), max_value, "clamped vaccination rate");
    Some(Warning::VaccinationCapped {
        country: first.country.clone(),
        records: capped.len(),
        max_value,
        bound: config.vaccination_upper_bound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 4, day).unwrap()
    }

    fn rec(country: &str, day: u32, confirmed: Option<u64>, population: Option<u64>) -> MergedRecord {
        MergedRecord {
            confirmed,
            deaths: confirmed.map(|c| c / 10),
            population,
            ..MergedRecord::empty(country, d(day))
        }
    }

    #[test]
    fn new_cases_use_the_previous_calendar_day_only() {
        let table = MergedTable::from_records(vec![
            rec("X", 1, Some(10), None),
            rec("X", 2, Some(25), None),
            rec("X", 4, Some(40), None),
            rec("X", 5, Some(38), None),
            rec("X", 6, None, None),
        ])
        .unwrap();
        let (table, _) = enrich(table, &MetricsConfig::default());
        let new: Vec<_> = table.records().iter().map(|r| r.derived.new_cases).collect();
        assert_eq!(new, vec![None, Some(15.0), None, Some(-2.0), None]);
    }

    #[test]
    fn per_100k_requires_population() {
        let table = MergedTable::from_records(vec![
            rec("A", 1, Some(50), Some(1_000_000)),
            rec("B", 1, Some(50), None),
            rec("C", 1, Some(50), Some(0)),
        ])
        .unwrap();
        let (table, _) = enrich(table, &MetricsConfig::default());
        let r = table.records();
        assert_eq!(r[0].derived.cases_per_100k, Some(5.0));
        assert_eq!(r[1].derived.cases_per_100k, None);
        assert_eq!(r[1].derived.deaths_per_100k, None);
        assert_eq!(r[2].derived.cases_per_100k, None);
    }

    #[test]
    fn vaccination_rate_is_clamped_and_flagged_once_per_country() {
        let mut records = vec![rec("X", 1, None, Some(100)), rec("X", 2, None, Some(100)), rec("X", 3, None, Some(100))];
        records[0].doses_administered = Some(50.0);
        records[1].doses_administered = Some(180.0);
        records[2].doses_administered = Some(210.0);
        let (table, warnings) = enrich(MergedTable::from_records(records).unwrap(), &MetricsConfig::default());
        let r = table.records();
        assert_eq!(r[0].derived.vaccination_rate, Some(0.5));
        assert!(!r[0].derived.vaccination_rate_capped);
        assert_eq!(r[1].derived.vaccination_rate, Some(1.0));
        assert!(r[2].derived.vaccination_rate_capped);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0],
            Warning::VaccinationCapped { records: 2, max_value, .. } if (max_value - 2.1).abs() < 1e-12
        ));
    }

    #[test]
    fn rolling_average_restarts_per_country() {
        let mut records = Vec::new();
        for day in 1..=9 {
            records.push(rec("A", day, Some(day as u64 * 10), None));
        }
        for day in 1..=3 {
            records.push(rec("B", day, Some(day as u64), None));
        }
        let (table, _) = enrich(MergedTable::from_records(records).unwrap(), &MetricsConfig::default());
        let a = table.country("A").unwrap();
        assert_eq!(a.get(d(7)).unwrap().derived.new_cases_rolling_avg, None);
        assert_eq!(a.get(d(8)).unwrap().derived.new_cases_rolling_avg, Some(10.0));
        let b = table.country("B").unwrap();
        assert!(b.records().iter().all(|r| r.derived.new_cases_rolling_avg.is_none()));
        assert_eq!(b.records()[0].derived.new_cases, None);
    }

    #[test]
    fn lagged_stringency_looks_back_exact_days() {
        let mut records: Vec<MergedRecord> = (1..=20).map(|day| rec("X", day, None, None)).collect();
        for (i, r) in records.iter_mut().enumerate() {
            r.stringency_index = Some(i as f64);
        }
        let config = MetricsConfig {
            lag_days: 3,
            ..MetricsConfig::default()
        };
        let (table, _) = enrich(MergedTable::from_records(records).unwrap(), &config);
        assert_eq!(table.get("X", d(3)).unwrap().derived.stringency_index_lagged, None);
        assert_eq!(table.get("X", d(10)).unwrap().derived.stringency_index_lagged, Some(6.0));
    }

    #[test]
    fn lag_past_the_calendar_has_no_lagged_value() {
        let mut record = rec("X", 2, Some(5), Some(10));
        record.stringency_index = Some(40.0);
        let records = vec![rec("X", 1, Some(1), Some(10)), record];
        let config = MetricsConfig {
            lag_days: u32::MAX,
            ..MetricsConfig::default()
        };
        let out = compute_metrics(MergedTable::from_records(records).unwrap(), &config);
        assert!(out.table.records().iter().all(|r| r.derived.stringency_index_lagged.is_none()));
        assert_eq!(out.summaries[0].lag_correlation.observations, 0);
        assert_eq!(out.summaries[0].lag_correlation.lag_days, u32::MAX);
    }

    #[test]
    fn short_series_reports_insufficient_data() {
        let table = MergedTable::from_records(vec![rec("X", 1, Some(1), Some(10))]).unwrap();
        let out = compute_metrics(table, &MetricsConfig::default());
        assert_eq!(out.summaries.len(), 1);
        assert!(out.warnings.iter().any(|w| matches!(
            w,
            Warning::InsufficientData { country, observed: 0, required: 30, .. } if country == "X"
        )));
    }
}
