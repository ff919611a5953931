//! The unified table produced by the merger and enriched by the metrics stage.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{CaseRow, PolicyRow, SourceKey, VaccinationRow};

/// Metrics derived from the source fields of a record.
///
/// All fields start as `None`; a metric whose inputs are missing stays `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub new_cases: Option<f64>,
    pub new_deaths: Option<f64>,
    pub cases_per_100k: Option<f64>,
    pub deaths_per_100k: Option<f64>,
    pub recovered_per_100k: Option<f64>,
    pub new_cases_per_100k: Option<f64>,
    pub new_deaths_per_100k: Option<f64>,
    /// Doses per person, clamped to the configured upper bound.
    pub vaccination_rate: Option<f64>,
    /// True when the raw rate exceeded the bound and was clamped.
    pub vaccination_rate_capped: bool,
    pub new_cases_rolling_avg: Option<f64>,
    pub new_deaths_rolling_avg: Option<f64>,
    /// Stringency index `lag_days` before this record's date.
    pub stringency_index_lagged: Option<f64>,
}

/// One row of the merged table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub country: String,
    pub date: NaiveDate,
    pub confirmed: Option<u64>,
    pub deaths: Option<u64>,
    pub recovered: Option<u64>,
    pub doses_administered: Option<f64>,
    pub people_fully_vaccinated_per_hundred: Option<f64>,
    pub stringency_index: Option<f64>,
    pub population: Option<u64>,
    pub derived: DerivedMetrics,
}

impl MergedRecord {
    /// A record with every field missing.
    pub fn empty(country: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            country: country.into(),
            date,
            confirmed: None,
            deaths: None,
            recovered: None,
            doses_administered: None,
            people_fully_vaccinated_per_hundred: None,
            stringency_index: None,
            population: None,
            derived: DerivedMetrics::default(),
        }
    }

    /// Build a record from whichever sources reported this key.
    pub fn from_sources(
        key: SourceKey,
        cases: Option<CaseRow>,
        vaccinations: Option<VaccinationRow>,
        policy: Option<PolicyRow>,
    ) -> Self {
        let cases = cases.unwrap_or_default();
        let vaccinations = vaccinations.unwrap_or_default();
        let policy = policy.unwrap_or_default();
        Self {
            confirmed: cases.confirmed,
            deaths: cases.deaths,
            recovered: cases.recovered,
            doses_administered: vaccinations.doses_administered,
            people_fully_vaccinated_per_hundred: vaccinations.people_fully_vaccinated_per_hundred,
            stringency_index: policy.stringency_index,
            ..Self::empty(key.country, key.date)
        }
    }

    pub fn key(&self) -> SourceKey {
        SourceKey::new(self.country.clone(), self.date)
    }
}

/// Two records share a `(country, date)` key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("duplicate key {0}")]
pub struct DuplicateKeyError(pub SourceKey);

/// Records sorted by `(country, date)` with unique keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedTable {
    records: Vec<MergedRecord>,
}

impl MergedTable {
    /// Sort records and reject duplicate keys.
    pub fn from_records(mut records: Vec<MergedRecord>) -> Result<Self, DuplicateKeyError> {
        records.sort_by(|a, b| (&a.country, a.date).cmp(&(&b.country, b.date)));
        for pair in records.windows(2) {
            if pair[0].country == pair[1].country && pair[0].date == pair[1].date {
                return Err(DuplicateKeyError(pair[1].key()));
            }
        }
        Ok(Self { records })
    }

    /// Wrap records the caller already holds in key order.
    pub(crate) fn from_sorted_unchecked(records: Vec<MergedRecord>) -> Self {
        debug_assert!(records
            .windows(2)
            .all(|p| (&p[0].country, p[0].date) < (&p[1].country, p[1].date)));
        Self { records }
    }

    pub fn records(&self) -> &[MergedRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<MergedRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up one record by key.
    pub fn get(&self, country: &str, date: NaiveDate) -> Option<&MergedRecord> {
        self.records
            .binary_search_by(|r| (r.country.as_str(), r.date).cmp(&(country, date)))
            .ok()
            .map(|i| &self.records[i])
    }

    /// Per-country views, in country order.
    pub fn series(&self) -> Vec<CountrySeries<'_>> {
        country_ranges(&self.records)
            .into_iter()
            .map(|(start, end)| CountrySeries {
                records: &self.records[start..end],
            })
            .collect()
    }

    /// The series for one country, if present.
    pub fn country(&self, country: &str) -> Option<CountrySeries<'_>> {
        let start = self
            .records
            .partition_point(|r| r.country.as_str() < country);
        let end = self
            .records
            .partition_point(|r| r.country.as_str() <= country);
        (start < end).then(|| CountrySeries {
            records: &self.records[start..end],
        })
    }

    pub fn country_count(&self) -> usize {
        country_ranges(&self.records).len()
    }

    /// Mutable per-country chunks for the metrics stage.
    pub(crate) fn country_chunks_mut(&mut self) -> Vec<&mut [MergedRecord]> {
        let ranges = country_ranges(&self.records);
        let mut chunks = Vec::with_capacity(ranges.len());
        let mut rest: &mut [MergedRecord] = &mut self.records;
        let mut consumed = 0;
        for (start, end) in ranges {
            debug_assert_eq!(start, consumed);
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(end - start);
            chunks.push(chunk);
            rest = tail;
            consumed = end;
        }
        chunks
    }
}

/// `[start, end)` index ranges of each country's contiguous run.
fn country_ranges(records: &[MergedRecord]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..=records.len() {
        if i == records.len() || records[i].country != records[start].country {
            if start < i {
                ranges.push((start, i));
            }
            start = i;
        }
    }
    ranges
}

/// Date-ascending view of one country's records.
#[derive(Debug, Clone, Copy)]
pub struct CountrySeries<'a> {
    records: &'a [MergedRecord],
}

impl<'a> CountrySeries<'a> {
    /// Wrap a slice that holds a single country in date order.
    pub fn new(records: &'a [MergedRecord]) -> Self {
        debug_assert!(records
            .windows(2)
            .all(|p| p[0].country == p[1].country && p[0].date < p[1].date));
        Self { records }
    }

    pub fn country(&self) -> &'a str {
        self.records.first().map_or("", |r| r.country.as_str())
    }

    pub fn records(&self) -> &'a [MergedRecord] {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.records.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }

    pub fn get(&self, date: NaiveDate) -> Option<&'a MergedRecord> {
        self.records
            .binary_search_by_key(&date, |r| r.date)
            .ok()
            .map(|i| &self.records[i])
    }

    /// Most recent non-missing value of a field.
    pub fn latest<T>(&self, field: impl Fn(&MergedRecord) -> Option<T>) -> Option<(NaiveDate, T)> {
        self.records
            .iter()
            .rev()
            .find_map(|r| field(r).map(|v| (r.date, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 6, day).unwrap()
    }

    fn rec(country: &str, day: u32, confirmed: Option<u64>) -> MergedRecord {
        MergedRecord {
            confirmed,
            ..MergedRecord::empty(country, d(day))
        }
    }

    #[test]
    fn from_records_sorts_by_key() {
        let table = MergedTable::from_records(vec![
            rec("Peru", 2, None),
            rec("Chad", 3, None),
            rec("Peru", 1, None),
        ])
        .unwrap();
        let keys: Vec<String> = table.records().iter().map(|r| r.key().to_string()).collect();
        assert_eq!(keys, vec!["Chad 2021-06-03", "Peru 2021-06-01", "Peru 2021-06-02"]);
    }

    #[test]
    fn from_records_rejects_duplicates() {
        let err = MergedTable::from_records(vec![rec("Peru", 1, Some(1)), rec("Peru", 1, Some(2))])
            .unwrap_err();
        assert_eq!(err.0, SourceKey::new("Peru", d(1)));
    }

    #[test]
    fn series_split_per_country() {
        let table = MergedTable::from_records(vec![
            rec("Chad", 1, None),
            rec("Chad", 2, None),
            rec("Peru", 1, None),
        ])
        .unwrap();
        let series = table.series();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].country(), "Chad");
        assert_eq!(series[0].len(), 2);
        assert_eq!(series[1].country(), "Peru");
        assert_eq!(table.country_count(), 2);
        assert_eq!(table.country("Peru").unwrap().len(), 1);
        assert!(table.country("Oman").is_none());
    }

    #[test]
    fn latest_skips_missing_values() {
        let records = vec![rec("Chad", 1, Some(5)), rec("Chad", 2, Some(9)), rec("Chad", 3, None)];
        let series = CountrySeries::new(&records);
        assert_eq!(series.latest(|r| r.confirmed), Some((d(2), 9)));
    }

    #[test]
    fn country_chunks_cover_all_records() {
        let mut table = MergedTable::from_records(vec![
            rec("Chad", 1, None),
            rec("Peru", 1, None),
            rec("Peru", 2, None),
        ])
        .unwrap();
        let lens: Vec<usize> = table.country_chunks_mut().iter().map(|c| c.len()).collect();
        assert_eq!(lens, vec![1, 2]);
    }
}
