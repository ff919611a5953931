//! covidlens runner: configuration, pipeline orchestration, manifest, summary.
//!
//! This crate builds on `covidlens-core` to provide:
//! - TOML `PipelineConfig` with command-line overrides
//! - The end-to-end run with parallel loading behind a join barrier
//! - The JSON run manifest with input and output fingerprints
//! - The Markdown summary and its chart-ready selections

pub mod config;
pub mod manifest;
pub mod pipeline;
pub mod report;

pub use config::{CasesSource, ConfigError, ConfigOverrides, PipelineConfig};
pub use manifest::{InputFingerprint, OutputFingerprint, RunManifest, SCHEMA_VERSION};
pub use pipeline::{analyze, build_aliases, load_inputs, run_pipeline, Analysis, RawInputs, RunError, RunReport};
pub use report::{deaths_vs_vaccination, render_summary, top_by_confirmed, ImpactRow};
