//! covidlens core: loaders, country normalization, merge, derived metrics, export.
//!
//! This crate holds the data path of the pipeline:
//! - Domain types (join keys, per-source rows, the merged table)
//! - CSV loaders for the long and Johns Hopkins wide layouts
//! - Explicit country alias resolution and the population reference
//! - Outer join on `(country, date)`
//! - Derived metrics, lag correlation and the correlation matrix
//! - Atomic CSV export and re-load, content fingerprints, dataset download

pub mod data;
pub mod domain;
pub mod export;
pub mod fingerprint;
pub mod metrics;
