//! Merged-table CSV export and re-load.
//!
//! Column order is fixed by [`MERGED_COLUMNS`]. Missing values are empty
//! cells. Floats use Rust's shortest round-trip formatting, so a file read
//! back with [`read_merged`] reproduces every value bit for bit.
//!
//! Writes are atomic: the file is written to a uniquely named temp file in
//! the destination directory, synced, then renamed into place. Several files
//! can be staged first and committed together with [`commit_all`].

use csv::StringRecord;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;

use crate::data::ingest::{cell, csv_reader, open_csv, read_headers};
use crate::data::DataError;
use crate::domain::{DerivedMetrics, MergedRecord, MergedTable};

/// Default output file name.
pub const DEFAULT_OUTPUT_FILE: &str = "merged_covid_dataset.csv";

/// Exported columns, in order.
pub const MERGED_COLUMNS: [&str; 21] = [
    "country",
    "date",
    "confirmed",
    "deaths",
    "recovered",
    "doses_administered",
    "people_fully_vaccinated_per_hundred",
    "stringency_index",
    "population",
    "new_cases",
    "new_deaths",
    "cases_per_100k",
    "deaths_per_100k",
    "recovered_per_100k",
    "new_cases_per_100k",
    "new_deaths_per_100k",
    "vaccination_rate",
    "vaccination_rate_capped",
    "new_cases_rolling_avg",
    "new_deaths_rolling_avg",
    "stringency_index_lagged",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Write the table atomically to `path`.
pub fn export_merged(table: &MergedTable, path: &Path) -> Result<(), DataError> {
    stage_merged(table, path)?.commit()?;
    tracing::info!(path = %path.display(), records = table.len(), "exported merged table");
    Ok(())
}

/// Write the table to a temp file next to `path`, ready to commit.
pub fn stage_merged(table: &MergedTable, path: &Path) -> Result<StagedFile, DataError> {
    stage(path, |out| write_merged_csv(table, out))
}

/// Serialize the table as CSV into any writer.
pub fn write_merged_csv<W: Write>(table: &MergedTable, out: W) -> io::Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(MERGED_COLUMNS)?;
    for record in table.records() {
        wtr.write_record(record_fields(record))?;
    }
    wtr.flush()
}

fn record_fields(r: &MergedRecord) -> [String; 21] {
    let d = &r.derived;
    [
        r.country.clone(),
        r.date.format(DATE_FORMAT).to_string(),
        fmt_opt(r.confirmed),
        fmt_opt(r.deaths),
        fmt_opt(r.recovered),
        fmt_opt(r.doses_administered),
        fmt_opt(r.people_fully_vaccinated_per_hundred),
        fmt_opt(r.stringency_index),
        fmt_opt(r.population),
        fmt_opt(d.new_cases),
        fmt_opt(d.new_deaths),
        fmt_opt(d.cases_per_100k),
        fmt_opt(d.deaths_per_100k),
        fmt_opt(d.recovered_per_100k),
        fmt_opt(d.new_cases_per_100k),
        fmt_opt(d.new_deaths_per_100k),
        fmt_opt(d.vaccination_rate),
        d.vaccination_rate_capped.to_string(),
        fmt_opt(d.new_cases_rolling_avg),
        fmt_opt(d.new_deaths_rolling_avg),
        fmt_opt(d.stringency_index_lagged),
    ]
}

fn fmt_opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Load an exported file.
pub fn read_merged(path: &Path) -> Result<MergedTable, DataError> {
    let source_name = format!("merged ({})", path.display());
    read_merged_from_reader(open_csv(path, &source_name)?, &source_name)
}

/// Parse exported CSV. Unlike the source loaders this is strict: any bad row fails.
pub fn read_merged_from_reader<R: Read>(
    mut rdr: csv::Reader<R>,
    source_name: &str,
) -> Result<MergedTable, DataError> {
    let headers = read_headers(&mut rdr, source_name)?;
    if !headers.iter().eq(MERGED_COLUMNS) {
        return Err(DataError::data_format(
            source_name,
            "header does not match the merged column layout",
        ));
    }

    let mut records = Vec::new();
    for result in rdr.records() {
        let row = result.map_err(|e| DataError::data_format(source_name, e.to_string()))?;
        let line = row.position().map_or(0, |p| p.line());
        let record = parse_record(&row)
            .map_err(|reason| DataError::data_format(source_name, format!("line {line}: {reason}")))?;
        records.push(record);
    }

    MergedTable::from_records(records).map_err(|e| DataError::data_format(source_name, e.to_string()))
}

fn parse_record(row: &StringRecord) -> Result<MergedRecord, String> {
    let field = |i: usize| cell(row, i);
    let country = field(0);
    if country.is_empty() {
        return Err("empty country".into());
    }
    let date = chrono::NaiveDate::parse_from_str(field(1), DATE_FORMAT)
        .map_err(|e| format!("date '{}': {e}", field(1)))?;
    let capped = match field(17) {
        "true" => true,
        "false" | "" => false,
        other => return Err(format!("vaccination_rate_capped '{other}' is not a boolean")),
    };

    Ok(MergedRecord {
        country: country.to_string(),
        date,
        confirmed: parse_opt(row, 2)?,
        deaths: parse_opt(row, 3)?,
        recovered: parse_opt(row, 4)?,
        doses_administered: parse_opt(row, 5)?,
        people_fully_vaccinated_per_hundred: parse_opt(row, 6)?,
        stringency_index: parse_opt(row, 7)?,
        population: parse_opt(row, 8)?,
        derived: DerivedMetrics {
            new_cases: parse_opt(row, 9)?,
            new_deaths: parse_opt(row, 10)?,
            cases_per_100k: parse_opt(row, 11)?,
            deaths_per_100k: parse_opt(row, 12)?,
            recovered_per_100k: parse_opt(row, 13)?,
            new_cases_per_100k: parse_opt(row, 14)?,
            new_deaths_per_100k: parse_opt(row, 15)?,
            vaccination_rate: parse_opt(row, 16)?,
            vaccination_rate_capped: capped,
            new_cases_rolling_avg: parse_opt(row, 18)?,
            new_deaths_rolling_avg: parse_opt(row, 19)?,
            stringency_index_lagged: parse_opt(row, 20)?,
        },
    })
}

fn parse_opt<T: FromStr>(row: &StringRecord, index: usize) -> Result<Option<T>, String> {
    match cell(row, index) {
        "" => Ok(None),
        value => value
            .parse()
            .map(Some)
            .map_err(|_| format!("{} '{value}' is not a valid value", MERGED_COLUMNS[index])),
    }
}

// ── Atomic writes ───────────────────────────────────────────────────

/// A fully written and synced temp file waiting to replace `path`.
/// Dropping it without [`commit`](Self::commit) removes the temp file.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    temp: NamedTempFile,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename into place, then sync the directory entry.
    pub fn commit(self) -> Result<(), DataError> {
        let StagedFile { path, temp } = self;
        temp.persist(&path)
            .map_err(|e| DataError::write(&path, e.error.to_string()))?;
        sync_dir(parent_dir(&path)).map_err(|e| DataError::write(&path, e.to_string()))
    }
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Write through a temp file in the destination directory and sync it.
pub fn stage<F>(path: &Path, write: F) -> Result<StagedFile, DataError>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> io::Result<()>,
{
    if path.file_name().is_none() {
        return Err(DataError::write(path, "path has no file name"));
    }
    let dir = parent_dir(path);
    let fail = |e: io::Error| DataError::write(path, e.to_string());
    fs::create_dir_all(dir).map_err(fail)?;

    let mut temp = NamedTempFile::new_in(dir).map_err(fail)?;
    {
        let mut out = BufWriter::new(temp.as_file_mut());
        write(&mut out).map_err(fail)?;
        out.flush().map_err(fail)?;
    }
    let file = temp.as_file();
    set_readable(file).map_err(fail)?;
    file.sync_all().map_err(fail)?;
    Ok(StagedFile {
        path: path.to_path_buf(),
        temp,
    })
}

pub fn stage_bytes(path: &Path, bytes: &[u8]) -> Result<StagedFile, DataError> {
    stage(path, |out| out.write_all(bytes))
}

/// Commit staged files in order. If one fails, files already committed by
/// this call are removed and the rest are discarded.
pub fn commit_all(staged: Vec<StagedFile>) -> Result<(), DataError> {
    let mut committed: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for file in staged {
        let path = file.path().to_path_buf();
        if let Err(e) = file.commit() {
            for done in &committed {
                if let Err(remove) = fs::remove_file(done) {
                    tracing::warn!(path = %done.display(), error = %remove, "cannot roll back output");
                }
            }
            return Err(e);
        }
        committed.push(path);
    }
    Ok(())
}

/// Write through a temp file, sync, rename. The temp file is removed on failure.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<(), DataError>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> io::Result<()>,
{
    stage(path, write)?.commit()
}

pub fn write_atomic_bytes(path: &Path, bytes: &[u8]) -> Result<(), DataError> {
    write_atomic(path, |out| out.write_all(bytes))
}

// Temp files are created owner-only.
#[cfg(unix)]
fn set_readable(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_readable(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Exported-table reader over an in-memory string, for tests.
pub fn read_merged_from_str(csv: &str) -> Result<MergedTable, DataError> {
    read_merged_from_reader(csv_reader(csv.as_bytes()), "merged")
}
