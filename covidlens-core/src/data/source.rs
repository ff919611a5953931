//! Source identity, structured errors, and non-fatal warnings.
//!
//! `DataError` is fatal and aborts the run. `Warning` is collected and
//! surfaced in the run summary; it never stops the pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::SourceTable;
use crate::fingerprint::FileHash;

/// The inputs of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Cases,
    Vaccinations,
    Policy,
    Population,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Cases => "cases",
            SourceKind::Vaccinations => "vaccinations",
            SourceKind::Policy => "policy",
            SourceKind::Population => "population",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fatal errors. Every variant names the failing source or path.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("{source_name}: data format error: {reason}")]
    DataFormat { source_name: String, reason: String },

    #[error("{source_name}: source unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("write failed for {}: {reason}", .path.display())]
    Write { path: PathBuf, reason: String },
}

impl DataError {
    pub fn data_format(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        DataError::DataFormat {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        DataError::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        DataError::Write {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Process exit status for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            DataError::DataFormat { .. } => 2,
            DataError::SourceUnavailable { .. } => 3,
            DataError::Write { .. } => 4,
        }
    }
}

/// Non-fatal conditions collected during a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Warning {
    #[error("{source_name}: skipped line {line}: {reason}")]
    SkippedRow {
        source_name: String,
        line: u64,
        reason: String,
    },

    #[error("{source_name}: ambiguous country name '{raw}' (candidates: {}), excluded", .candidates.join(", "))]
    AmbiguousCountry {
        source_name: String,
        raw: String,
        candidates: Vec<String>,
    },

    #[error("{source_name}: unmapped country name '{raw}', excluded")]
    UnmappedCountry { source_name: String, raw: String },

    #[error("{source_name}: duplicate row for {country}{}, keeping first occurrence", date_suffix(.date))]
    DuplicateKey {
        source_name: String,
        country: String,
        date: Option<NaiveDate>,
    },

    #[error("{country}: {metric} undefined ({observed} paired observations, {required} required)")]
    InsufficientData {
        country: String,
        metric: String,
        observed: usize,
        required: usize,
    },

    #[error("{country}: vaccination rate above {bound} on {records} records (max {max_value:.3}), clamped and flagged")]
    VaccinationCapped {
        country: String,
        records: usize,
        max_value: f64,
        bound: f64,
    },
}

fn date_suffix(date: &Option<NaiveDate>) -> String {
    date.map(|d| format!(" on {d}")).unwrap_or_default()
}

/// Warning categories, for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    SkippedRow,
    AmbiguousCountry,
    UnmappedCountry,
    DuplicateKey,
    InsufficientData,
    VaccinationCapped,
}

impl WarningKind {
    pub fn label(&self) -> &'static str {
        match self {
            WarningKind::SkippedRow => "skipped rows",
            WarningKind::AmbiguousCountry => "ambiguous country names",
            WarningKind::UnmappedCountry => "unmapped country names",
            WarningKind::DuplicateKey => "duplicate keys",
            WarningKind::InsufficientData => "undefined correlations",
            WarningKind::VaccinationCapped => "clamped vaccination rates",
        }
    }
}

impl Warning {
    pub fn kind(&self) -> WarningKind {
        match self {
            Warning::SkippedRow { .. } => WarningKind::SkippedRow,
            Warning::AmbiguousCountry { .. } => WarningKind::AmbiguousCountry,
            Warning::UnmappedCountry { .. } => WarningKind::UnmappedCountry,
            Warning::DuplicateKey { .. } => WarningKind::DuplicateKey,
            Warning::InsufficientData { .. } => WarningKind::InsufficientData,
            Warning::VaccinationCapped { .. } => WarningKind::VaccinationCapped,
        }
    }
}

/// Row accounting for one loaded file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    /// Data rows read (header excluded).
    pub rows_read: u64,
    /// Rows that produced a table entry.
    pub rows_loaded: u64,
    /// Unparseable rows.
    pub rows_skipped: u64,
    /// Rows rejected by the schema's row filter.
    pub rows_filtered: u64,
    /// Rows whose key was already present.
    pub duplicates: u64,
}

impl LoadStats {
    /// Rows that were candidates for loading.
    pub fn considered(&self) -> u64 {
        self.rows_read - self.rows_filtered
    }

    pub fn skip_fraction(&self) -> f64 {
        match self.considered() {
            0 => 0.0,
            n => self.rows_skipped as f64 / n as f64,
        }
    }

    pub fn absorb(&mut self, other: &LoadStats) {
        self.rows_read += other.rows_read;
        self.rows_loaded += other.rows_loaded;
        self.rows_skipped += other.rows_skipped;
        self.rows_filtered += other.rows_filtered;
        self.duplicates += other.duplicates;
    }

    /// Fail when nothing was loadable or too many rows were skipped.
    pub fn check(&self, source_name: &str, max_skip_fraction: f64) -> Result<(), DataError> {
        if self.considered() == 0 {
            return Err(DataError::data_format(source_name, "no data rows"));
        }
        let fraction = self.skip_fraction();
        if fraction > max_skip_fraction {
            return Err(DataError::data_format(
                source_name,
                format!(
                    "{} of {} rows unparseable ({:.1}% exceeds the {:.1}% limit)",
                    self.rows_skipped,
                    self.considered(),
                    fraction * 100.0,
                    max_skip_fraction * 100.0
                ),
            ));
        }
        Ok(())
    }
}

/// A loaded source together with its accounting.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub table: SourceTable<T>,
    pub stats: LoadStats,
    pub warnings: Vec<Warning>,
    /// Files the table was parsed from.
    pub files: Vec<FileHash>,
}

impl<T> Default for Loaded<T> {
    fn default() -> Self {
        Self {
            table: SourceTable::new(),
            stats: LoadStats::default(),
            warnings: Vec::new(),
            files: Vec::new(),
        }
    }
}
