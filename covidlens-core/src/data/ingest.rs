//! Long-layout CSV loaders for cases, vaccinations and policy.
//!
//! Each loader resolves its schema against the header (missing column is a
//! `DataFormat` error), then parses row by row. A row that fails to parse is
//! skipped and recorded; the load fails only when the skipped fraction exceeds
//! `IngestOptions::max_skip_fraction`.

use chrono::NaiveDate;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::schema::{optional_column, require_column, CaseSchema, PolicySchema, ResolvedFilter, VaccinationSchema};
use super::source::{DataError, LoadStats, Loaded, Warning};
use crate::domain::rows::STRINGENCY_RANGE;
use crate::domain::{CaseRow, PolicyRow, SourceKey, VaccinationRow};
use crate::fingerprint::{FileHash, HashingReader};

/// Default tolerated share of unparseable rows per source.
pub const DEFAULT_MAX_SKIP_FRACTION: f64 = 0.05;

/// Options shared by every loader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IngestOptions {
    pub max_skip_fraction: f64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_skip_fraction: DEFAULT_MAX_SKIP_FRACTION,
        }
    }
}

// ── Public loaders ──────────────────────────────────────────────────

pub fn load_cases(
    path: &Path,
    schema: &CaseSchema,
    opts: &IngestOptions,
) -> Result<Loaded<CaseRow>, DataError> {
    let source_name = source_label("cases", path);
    let (mut loaded, file) = load_hashed(path, &source_name, |rdr| read_cases(rdr, &source_name, schema, opts))?;
    loaded.files.push(file);
    Ok(loaded)
}

pub fn read_cases<R: Read>(
    mut rdr: csv::Reader<R>,
    source_name: &str,
    schema: &CaseSchema,
    opts: &IngestOptions,
) -> Result<Loaded<CaseRow>, DataError> {
    let headers = read_headers(&mut rdr, source_name)?;
    let key = KeyColumns::resolve(
        &headers,
        &schema.country_column,
        &schema.date_column,
        &schema.date_format,
        source_name,
    )?;
    let filter = ResolvedFilter::resolve(&headers, schema.filter.as_ref(), source_name)?;
    let confirmed = require_column(&headers, &schema.confirmed_column, source_name)?;
    let deaths = require_column(&headers, &schema.deaths_column, source_name)?;
    let recovered = optional_column(&headers, schema.recovered_column.as_deref(), source_name)?;

    ingest_long(rdr, source_name, &key, filter.as_ref(), opts, |record| {
        Ok(CaseRow {
            confirmed: parse_count(cell(record, confirmed)).map_err(|e| format!("confirmed: {e}"))?,
            deaths: parse_count(cell(record, deaths)).map_err(|e| format!("deaths: {e}"))?,
            recovered: recovered
                .map(|i| parse_count(cell(record, i)).map_err(|e| format!("recovered: {e}")))
                .transpose()?
                .flatten(),
        })
    })
}

pub fn load_vaccinations(
    path: &Path,
    schema: &VaccinationSchema,
    opts: &IngestOptions,
) -> Result<Loaded<VaccinationRow>, DataError> {
    let source_name = source_label("vaccinations", path);
    let (mut loaded, file) = load_hashed(path, &source_name, |rdr| read_vaccinations(rdr, &source_name, schema, opts))?;
    loaded.files.push(file);
    Ok(loaded)
}

pub fn read_vaccinations<R: Read>(
    mut rdr: csv::Reader<R>,
    source_name: &str,
    schema: &VaccinationSchema,
    opts: &IngestOptions,
) -> Result<Loaded<VaccinationRow>, DataError> {
    let headers = read_headers(&mut rdr, source_name)?;
    let key = KeyColumns::resolve(
        &headers,
        &schema.country_column,
        &schema.date_column,
        &schema.date_format,
        source_name,
    )?;
    let filter = ResolvedFilter::resolve(&headers, schema.filter.as_ref(), source_name)?;
    let doses = require_column(&headers, &schema.doses_column, source_name)?;
    let fully = optional_column(&headers, schema.fully_vaccinated_column.as_deref(), source_name)?;

    ingest_long(rdr, source_name, &key, filter.as_ref(), opts, |record| {
        Ok(VaccinationRow {
            doses_administered: parse_amount(cell(record, doses))
                .map_err(|e| format!("doses: {e}"))?,
            people_fully_vaccinated_per_hundred: fully
                .map(|i| parse_amount(cell(record, i)).map_err(|e| format!("fully vaccinated: {e}")))
                .transpose()?
                .flatten(),
        })
    })
}

pub fn load_policy(
    path: &Path,
    schema: &PolicySchema,
    opts: &IngestOptions,
) -> Result<Loaded<PolicyRow>, DataError> {
    let source_name = source_label("policy", path);
    let (mut loaded, file) = load_hashed(path, &source_name, |rdr| read_policy(rdr, &source_name, schema, opts))?;
    loaded.files.push(file);
    Ok(loaded)
}

pub fn read_policy<R: Read>(
    mut rdr: csv::Reader<R>,
    source_name: &str,
    schema: &PolicySchema,
    opts: &IngestOptions,
) -> Result<Loaded<PolicyRow>, DataError> {
    let headers = read_headers(&mut rdr, source_name)?;
    let key = KeyColumns::resolve(
        &headers,
        &schema.country_column,
        &schema.date_column,
        &schema.date_format,
        source_name,
    )?;
    let filter = ResolvedFilter::resolve(&headers, schema.filter.as_ref(), source_name)?;
    let stringency = require_column(&headers, &schema.stringency_column, source_name)?;

    ingest_long(rdr, source_name, &key, filter.as_ref(), opts, |record| {
        let value = parse_amount(cell(record, stringency)).map_err(|e| format!("stringency: {e}"))?;
        if let Some(v) = value {
            let (lo, hi) = STRINGENCY_RANGE;
            if !(lo..=hi).contains(&v) {
                return Err(format!("stringency {v} outside [{lo}, {hi}]"));
            }
        }
        Ok(PolicyRow {
            stringency_index: value,
        })
    })
}

// ── Shared plumbing ─────────────────────────────────────────────────

/// `"cases (owid-covid-data.csv)"`, so errors name the failing file.
pub(crate) fn source_label(kind: &str, path: &Path) -> String {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => format!("{kind} ({name})"),
        None => kind.to_string(),
    }
}

pub(crate) fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

pub(crate) fn open_csv(path: &Path, source_name: &str) -> Result<csv::Reader<File>, DataError> {
    let file = File::open(path)
        .map_err(|e| DataError::unavailable(source_name, format!("{}: {e}", path.display())))?;
    Ok(csv_reader(file))
}

/// Parse `path` with `read` and hash exactly the bytes the parser consumed.
pub(crate) fn load_hashed<T>(
    path: &Path,
    source_name: &str,
    read: impl FnOnce(csv::Reader<&mut HashingReader<File>>) -> Result<T, DataError>,
) -> Result<(T, FileHash), DataError> {
    let mut input = HashingReader::open(path, source_name)?;
    let value = read(csv_reader(&mut input))?;
    let blake3 = input.finish(source_name)?;
    Ok((
        value,
        FileHash {
            path: path.to_path_buf(),
            blake3,
        },
    ))
}

pub(crate) fn read_headers<R: Read>(
    rdr: &mut csv::Reader<R>,
    source_name: &str,
) -> Result<StringRecord, DataError> {
    rdr.headers().cloned().map_err(|e| classify_csv_error(e, source_name))
}

fn classify_csv_error(err: csv::Error, source_name: &str) -> DataError {
    if err.is_io_error() {
        DataError::unavailable(source_name, err.to_string())
    } else {
        DataError::data_format(source_name, err.to_string())
    }
}

pub(crate) fn cell(record: &StringRecord, index: usize) -> &str {
    record.get(index).unwrap_or("")
}

/// Country and date columns of a long-layout source.
#[derive(Debug, Clone)]
pub(crate) struct KeyColumns {
    country: usize,
    date: usize,
    date_format: String,
}

impl KeyColumns {
    pub(crate) fn resolve(
        headers: &StringRecord,
        country_column: &str,
        date_column: &str,
        date_format: &str,
        source_name: &str,
    ) -> Result<Self, DataError> {
        Ok(Self {
            country: require_column(headers, country_column, source_name)?,
            date: require_column(headers, date_column, source_name)?,
            date_format: date_format.to_string(),
        })
    }

    pub(crate) fn parse(&self, record: &StringRecord) -> Result<SourceKey, String> {
        let country = cell(record, self.country);
        if country.is_empty() {
            return Err("empty country".into());
        }
        let date = parse_date(cell(record, self.date), &self.date_format)?;
        Ok(SourceKey::new(country, date))
    }
}

/// Collects skipped rows for one source.
pub(crate) struct SkipLog<'a> {
    source_name: &'a str,
    pub(crate) stats: LoadStats,
    pub(crate) warnings: Vec<Warning>,
}

impl<'a> SkipLog<'a> {
    pub(crate) fn new(source_name: &'a str) -> Self {
        Self {
            source_name,
            stats: LoadStats::default(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn skip(&mut self, line: u64, reason: String) {
        tracing::debug!(source = self.source_name, line, %reason, "skipping row");
        self.stats.rows_skipped += 1;
        self.warnings.push(Warning::SkippedRow {
            source_name: self.source_name.to_string(),
            line,
            reason,
        });
    }

    pub(crate) fn duplicate(&mut self, key: &SourceKey) {
        self.stats.duplicates += 1;
        self.warnings.push(Warning::DuplicateKey {
            source_name: self.source_name.to_string(),
            country: key.country.clone(),
            date: Some(key.date),
        });
    }

    /// Apply the skip threshold and emit the per-source summary log.
    pub(crate) fn finish(&self, opts: &IngestOptions) -> Result<(), DataError> {
        self.stats.check(self.source_name, opts.max_skip_fraction)?;
        if self.stats.rows_skipped > 0 {
            tracing::warn!(
                source = self.source_name,
                skipped = self.stats.rows_skipped,
                considered = self.stats.considered(),
                "skipped unparseable rows"
            );
        }
        Ok(())
    }
}

/// Read records one at a time, handing each parsed row to `on_row`.
///
/// I/O failures abort with `SourceUnavailable`; malformed records (wrong field
/// count, invalid UTF-8) count as skipped rows.
pub(crate) fn for_each_record<R: Read>(
    rdr: &mut csv::Reader<R>,
    log: &mut SkipLog<'_>,
    mut on_row: impl FnMut(&StringRecord, u64, &mut SkipLog<'_>),
) -> Result<(), DataError> {
    let mut record = StringRecord::new();
    loop {
        match rdr.read_record(&mut record) {
            Ok(true) => {
                log.stats.rows_read += 1;
                let line = record.position().map_or(log.stats.rows_read + 1, |p| p.line());
                on_row(&record, line, log);
            }
            Ok(false) => return Ok(()),
            Err(e) if e.is_io_error() => {
                return Err(DataError::unavailable(log.source_name, e.to_string()))
            }
            Err(e) => {
                log.stats.rows_read += 1;
                let line = e.position().map_or(log.stats.rows_read + 1, |p| p.line());
                log.skip(line, e.to_string());
            }
        }
    }
}

fn ingest_long<R: Read, T>(
    mut rdr: csv::Reader<R>,
    source_name: &str,
    key: &KeyColumns,
    filter: Option<&ResolvedFilter>,
    opts: &IngestOptions,
    parse_values: impl Fn(&StringRecord) -> Result<T, String>,
) -> Result<Loaded<T>, DataError> {
    let mut log = SkipLog::new(source_name);
    let mut loaded = Loaded::default();

    for_each_record(&mut rdr, &mut log, |record, line, log| {
        if let Some(f) = filter {
            if !f.accepts(record) {
                log.stats.rows_filtered += 1;
                return;
            }
        }
        let parsed = key
            .parse(record)
            .and_then(|k| parse_values(record).map(|row| (k, row)));
        match parsed {
            Ok((k, row)) => match loaded.table.entry(k) {
                Entry::Vacant(slot) => {
                    slot.insert(row);
                    log.stats.rows_loaded += 1;
                }
                Entry::Occupied(slot) => log.duplicate(slot.key()),
            },
            Err(reason) => log.skip(line, reason),
        }
    })?;

    log.finish(opts)?;
    tracing::info!(
        source = source_name,
        rows = log.stats.rows_loaded,
        skipped = log.stats.rows_skipped,
        "loaded source"
    );
    loaded.stats = log.stats;
    loaded.warnings = log.warnings;
    Ok(loaded)
}

// ── Cell parsers ────────────────────────────────────────────────────

pub(crate) fn parse_date(cell: &str, format: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(cell, format).map_err(|e| format!("date '{cell}' ({format}): {e}"))
}

/// Non-negative integer count. Accepts `"12"` and `"12.0"`; blank is `None`.
pub(crate) fn parse_count(cell: &str) -> Result<Option<u64>, String> {
    if cell.is_empty() {
        return Ok(None);
    }
    if let Ok(v) = cell.parse::<u64>() {
        return Ok(Some(v));
    }
    let v: f64 = cell.parse().map_err(|_| format!("'{cell}' is not a number"))?;
    if !v.is_finite() || v < 0.0 {
        return Err(format!("'{cell}' is not a non-negative count"));
    }
    if v.fract() != 0.0 {
        return Err(format!("'{cell}' is not a whole number"));
    }
    Ok(Some(v as u64))
}

/// Non-negative finite real; blank is `None`.
pub(crate) fn parse_amount(cell: &str) -> Result<Option<f64>, String> {
    if cell.is_empty() {
        return Ok(None);
    }
    let v: f64 = cell.parse().map_err(|_| format!("'{cell}' is not a number"))?;
    if !v.is_finite() || v < 0.0 {
        return Err(format!("'{cell}' is not a non-negative number"));
    }
    Ok(Some(v))
}
