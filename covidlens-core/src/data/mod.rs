//! Data ingestion: loaders, country normalization, population, merge, download

pub mod aliases;
pub mod align;
pub mod download;
pub mod ingest;
pub mod jhu;
pub mod population;
pub mod schema;
pub mod source;

pub use aliases::{CountryAliases, Resolution};
pub use align::{merge_sources, normalize_countries, MergeOutput, SourceTables};
pub use download::{download_datasets, DatasetSpec, DownloadOutcome, DownloadSummary, Fetcher, HttpFetcher, DEFAULT_DATASETS};
pub use ingest::{load_cases, load_policy, load_vaccinations, IngestOptions, DEFAULT_MAX_SKIP_FRACTION};
pub use jhu::{load_jhu_cases, load_jhu_measure, JhuPaths};
pub use population::{PopulationLoad, PopulationTable};
pub use schema::{CaseSchema, PolicySchema, PopulationSchema, RowFilter, VaccinationSchema, WideSchema};
pub use source::{DataError, LoadStats, Loaded, SourceKind, Warning, WarningKind};
