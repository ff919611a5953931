//! Domain types for the merge pipeline

pub mod ids;
pub mod key;
pub mod merged;
pub mod rows;

pub use ids::DatasetHash;
pub use key::SourceKey;
pub use merged::{CountrySeries, DerivedMetrics, DuplicateKeyError, MergedRecord, MergedTable};
pub use rows::{CaseRow, PolicyRow, SourceTable, VaccinationRow};
