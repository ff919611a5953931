//! Run manifest: the JSON sidecar written next to the merged CSV.
//!
//! The manifest carries no timestamps, so identical inputs and configuration
//! produce an identical manifest.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use covidlens_core::data::{DataError, LoadStats, SourceKind, WarningKind};
use covidlens_core::domain::DatasetHash;
use covidlens_core::export::{stage_bytes, StagedFile};
use covidlens_core::fingerprint::{hash_json, hash_table};

use crate::config::{ConfigError, PipelineConfig};
use crate::pipeline::Analysis;

/// Current schema version of the manifest format.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFingerprint {
    pub path: String,
    /// Sources read from this file.
    pub roles: Vec<String>,
    pub blake3: DatasetHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFingerprint {
    pub path: String,
    pub blake3: DatasetHash,
    pub records: usize,
    pub countries: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub tool_version: String,
    pub config_hash: DatasetHash,
    pub inputs: Vec<InputFingerprint>,
    pub output: OutputFingerprint,
    pub load_stats: BTreeMap<SourceKind, LoadStats>,
    pub warnings: BTreeMap<WarningKind, usize>,
    pub missing_population: Vec<String>,
    pub config: PipelineConfig,
}

impl RunManifest {
    pub fn build(config: &PipelineConfig, analysis: &Analysis) -> Result<Self, ConfigError> {
        let config_hash = hash_json(config).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        let dates = analysis.table.records().iter().map(|r| r.date);
        Ok(Self {
            schema_version: SCHEMA_VERSION,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
            inputs: analysis.inputs.clone(),
            output: OutputFingerprint {
                path: config.output.merged.display().to_string(),
                blake3: hash_table(&analysis.table),
                records: analysis.table.len(),
                countries: analysis.table.country_count(),
                first_date: dates.clone().min(),
                last_date: dates.max(),
            },
            load_stats: analysis.load_stats.clone(),
            warnings: analysis.warning_counts(),
            missing_population: analysis.missing_population.clone(),
            config: config.clone(),
        })
    }

    pub fn total_warnings(&self) -> usize {
        self.warnings.values().sum()
    }

    /// Serialize into a temp file next to `path`; see [`StagedFile`].
    pub fn stage(&self, path: &Path) -> Result<StagedFile, DataError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| DataError::write(path, e.to_string()))?;
        stage_bytes(path, &json)
    }

    pub fn write(&self, path: &Path) -> Result<(), DataError> {
        self.stage(path)?.commit()
    }

    pub fn read(path: &Path) -> Result<Self, DataError> {
        let source_name = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|e| DataError::unavailable(&source_name, e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| DataError::data_format(&source_name, e.to_string()))
    }
}
