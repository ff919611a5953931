//! Johns Hopkins CSSE wide time series.
//!
//! Each file holds one measure (confirmed, deaths or recovered): identifier
//! columns followed by one column per date. Rows are provinces; they are
//! summed per country and date. If any province is blank for a date the
//! country total for that date is missing rather than an undercount.

use csv::StringRecord;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use super::ingest::{cell, for_each_record, load_hashed, parse_count, parse_date, read_headers, source_label, IngestOptions, SkipLog};
use super::schema::{require_column, WideSchema};
use super::source::{DataError, LoadStats, Loaded};
use crate::domain::{CaseRow, SourceKey, SourceTable};

/// Paths of the per-measure files.
#[derive(Debug, Clone, Copy)]
pub struct JhuPaths<'a> {
    pub confirmed: &'a Path,
    pub deaths: &'a Path,
    pub recovered: Option<&'a Path>,
}

/// Load the confirmed/deaths/(recovered) files and outer-join them into case rows.
pub fn load_jhu_cases(
    paths: JhuPaths<'_>,
    schema: &WideSchema,
    opts: &IngestOptions,
) -> Result<Loaded<CaseRow>, DataError> {
    let confirmed = load_jhu_measure(paths.confirmed, "confirmed", schema, opts)?;
    let deaths = load_jhu_measure(paths.deaths, "deaths", schema, opts)?;
    let recovered = paths
        .recovered
        .map(|p| load_jhu_measure(p, "recovered", schema, opts))
        .transpose()?;
    Ok(combine_measures(confirmed, deaths, recovered))
}

/// Load one wide file into per-country totals.
pub fn load_jhu_measure(
    path: &Path,
    measure: &str,
    schema: &WideSchema,
    opts: &IngestOptions,
) -> Result<Loaded<Option<u64>>, DataError> {
    let source_name = source_label(&format!("cases/{measure}"), path);
    let (mut loaded, file) = load_hashed(path, &source_name, |rdr| read_jhu_measure(rdr, &source_name, schema, opts))?;
    loaded.files.push(file);
    Ok(loaded)
}

pub fn read_jhu_measure<R: Read>(
    mut rdr: csv::Reader<R>,
    source_name: &str,
    schema: &WideSchema,
    opts: &IngestOptions,
) -> Result<Loaded<Option<u64>>, DataError> {
    let headers = read_headers(&mut rdr, source_name)?;
    let country_idx = require_column(&headers, &schema.country_column, source_name)?;
    let date_columns = date_columns(&headers, schema, source_name)?;

    let mut log = SkipLog::new(source_name);
    let mut table: SourceTable<Option<u64>> = SourceTable::new();

    for_each_record(&mut rdr, &mut log, |record, line, log| {
        match parse_province(record, country_idx, &date_columns) {
            Ok((country, values)) => match add_province(&table, country, values) {
                Ok(totals) => {
                    table.extend(totals);
                    log.stats.rows_loaded += 1;
                }
                Err(reason) => log.skip(line, reason),
            },
            Err(reason) => log.skip(line, reason),
        }
    })?;

    log.finish(opts)?;
    tracing::info!(
        source = source_name,
        provinces = log.stats.rows_loaded,
        keys = table.len(),
        "loaded wide time series"
    );
    Ok(Loaded {
        table,
        stats: log.stats,
        warnings: log.warnings,
        files: Vec::new(),
    })
}

/// `(column index, date)` for every non-identifier column.
fn date_columns(
    headers: &StringRecord,
    schema: &WideSchema,
    source_name: &str,
) -> Result<Vec<(usize, NaiveDate)>, DataError> {
    let ids: BTreeSet<&str> = schema.id_columns.iter().map(String::as_str).collect();
    let columns = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !ids.contains(h))
        .map(|(i, h)| {
            parse_date(h, &schema.date_format)
                .map(|date| (i, date))
                .map_err(|e| DataError::data_format(source_name, format!("column header {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err(DataError::data_format(source_name, "no date columns"));
    }
    Ok(columns)
}

fn parse_province<'r>(
    record: &'r StringRecord,
    country_idx: usize,
    date_columns: &[(usize, NaiveDate)],
) -> Result<(&'r str, Vec<(NaiveDate, Option<u64>)>), String> {
    let country = cell(record, country_idx);
    if country.is_empty() {
        return Err("empty country".into());
    }
    let values = date_columns
        .iter()
        .map(|&(i, date)| {
            parse_count(cell(record, i))
                .map(|v| (date, v))
                .map_err(|e| format!("{date}: {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((country, values))
}

/// Country totals after adding one province row. A row that would overflow
/// any total is rejected whole.
fn add_province(
    table: &SourceTable<Option<u64>>,
    country: &str,
    values: Vec<(NaiveDate, Option<u64>)>,
) -> Result<Vec<(SourceKey, Option<u64>)>, String> {
    values
        .into_iter()
        .map(|(date, value)| {
            let key = SourceKey::new(country, date);
            let total = match table.get(&key) {
                Some(&total) => sum_present(total, value).map_err(|e| format!("{date}: {e}"))?,
                None => value,
            };
            Ok((key, total))
        })
        .collect()
}

fn sum_present(total: Option<u64>, value: Option<u64>) -> Result<Option<u64>, String> {
    match (total, value) {
        (Some(a), Some(b)) => a
            .checked_add(b)
            .map(Some)
            .ok_or_else(|| format!("country total {a} + {b} overflows")),
        _ => Ok(None),
    }
}

/// Outer join of the per-measure tables.
fn combine_measures(
    confirmed: Loaded<Option<u64>>,
    deaths: Loaded<Option<u64>>,
    recovered: Option<Loaded<Option<u64>>>,
) -> Loaded<CaseRow> {
    let mut stats = LoadStats::default();
    let mut warnings = Vec::new();
    let mut files = Vec::new();
    let mut table: SourceTable<CaseRow> = SourceTable::new();

    let mut absorb = |measure: Loaded<Option<u64>>, set: fn(&mut CaseRow, Option<u64>)| {
        stats.absorb(&measure.stats);
        warnings.extend(measure.warnings);
        files.extend(measure.files);
        for (key, value) in measure.table {
            set(table.entry(key).or_default(), value);
        }
    };

    absorb(confirmed, |row, v| row.confirmed = v);
    absorb(deaths, |row, v| row.deaths = v);
    if let Some(r) = recovered {
        absorb(r, |row, v| row.recovered = v);
    }

    Loaded {
        table,
        stats,
        warnings,
        files,
    }
}
