//! The `(country, date)` join key shared by every table.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Join key for a single row.
///
/// Ordering is country first, then date, so a `BTreeMap<SourceKey, _>`
/// iterates each country's rows contiguously and in date order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceKey {
    pub country: String,
    pub date: NaiveDate,
}

impl SourceKey {
    pub fn new(country: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            country: country.into(),
            date,
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.country, self.date)
    }
}
