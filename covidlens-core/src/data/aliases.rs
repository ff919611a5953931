//! Country name normalization.
//!
//! Sources disagree on names ("US" vs "United States", "Korea, South" vs
//! "South Korea"). Resolution is an explicit lookup, never fuzzy matching:
//! a raw name is either an alias with exactly one target, a canonical name,
//! an excluded aggregate, or unmapped.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use super::ingest::{cell, csv_reader, load_hashed, read_headers};
use super::schema::require_column;
use super::source::DataError;
use crate::fingerprint::FileHash;

/// Raw → canonical pairs applied by default. Targets follow Our World in Data naming.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("US", "United States"),
    ("USA", "United States"),
    ("United States of America", "United States"),
    ("UK", "United Kingdom"),
    ("Korea, South", "South Korea"),
    ("Korea, North", "North Korea"),
    ("Taiwan*", "Taiwan"),
    ("Burma", "Myanmar"),
    ("Congo (Kinshasa)", "Democratic Republic of Congo"),
    ("Congo (Brazzaville)", "Congo"),
    ("Cabo Verde", "Cape Verde"),
    ("Czech Republic", "Czechia"),
    ("Holy See", "Vatican"),
    ("West Bank and Gaza", "Palestine"),
    ("Timor-Leste", "East Timor"),
    ("Micronesia", "Micronesia (country)"),
    ("Kyrgyz Republic", "Kyrgyzstan"),
    ("Slovak Republic", "Slovakia"),
];

/// Aggregates and non-country entities that never become canonical.
const BUILTIN_EXCLUDED: &[&str] = &[
    "World",
    "Africa",
    "Asia",
    "Europe",
    "North America",
    "South America",
    "Oceania",
    "European Union",
    "International",
    "High income",
    "Upper middle income",
    "Lower middle income",
    "Low income",
    "Summer Olympics 2020",
    "Winter Olympics 2022",
    "Diamond Princess",
    "MS Zaandam",
    "Antarctica",
];

/// Outcome of looking up one raw name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    Canonical(&'a str),
    /// The alias table maps this name to more than one target.
    Ambiguous(Vec<String>),
    /// A known aggregate; dropped without a warning.
    Excluded,
    Unmapped,
}

/// Alias table plus the set of canonical country names.
#[derive(Debug, Clone, Default)]
pub struct CountryAliases {
    aliases: BTreeMap<String, BTreeSet<String>>,
    canonical: BTreeSet<String>,
    excluded: BTreeSet<String>,
}

impl CountryAliases {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default alias and exclusion tables.
    pub fn builtin() -> Self {
        let mut aliases = Self::new();
        for &(raw, canonical) in BUILTIN_ALIASES {
            aliases.insert_alias(raw, canonical);
        }
        for &name in BUILTIN_EXCLUDED {
            aliases.add_excluded(name);
        }
        aliases
    }

    /// Map `raw` to `canonical`. A second, different target makes `raw` ambiguous.
    pub fn insert_alias(&mut self, raw: impl Into<String>, canonical: impl Into<String>) {
        let canonical = canonical.into();
        self.canonical.insert(canonical.clone());
        self.aliases.entry(raw.into()).or_default().insert(canonical);
    }

    /// Register a canonical name unless it is excluded or already an alias.
    pub fn add_canonical(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.excluded.contains(&name) && !self.aliases.contains_key(&name) {
            self.canonical.insert(name);
        }
    }

    pub fn add_excluded(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.canonical.remove(&name);
        self.excluded.insert(name);
    }

    /// Merge `raw,canonical` pairs from a CSV file. Returns the number of
    /// pairs and the hash of the bytes read.
    pub fn extend_from_csv(&mut self, path: &Path) -> Result<(usize, FileHash), DataError> {
        let source_name = format!("aliases ({})", path.display());
        load_hashed(path, &source_name, |rdr| self.extend_from_reader(rdr, &source_name))
    }

    pub fn extend_from_reader<R: Read>(
        &mut self,
        mut rdr: csv::Reader<R>,
        source_name: &str,
    ) -> Result<usize, DataError> {
        let headers = read_headers(&mut rdr, source_name)?;
        let raw_idx = require_column(&headers, "raw", source_name)?;
        let canonical_idx = require_column(&headers, "canonical", source_name)?;

        let mut added = 0;
        for (i, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| DataError::data_format(source_name, e.to_string()))?;
            let (raw, canonical) = (cell(&record, raw_idx), cell(&record, canonical_idx));
            if raw.is_empty() || canonical.is_empty() {
                return Err(DataError::data_format(
                    source_name,
                    format!("line {}: empty alias entry", i + 2),
                ));
            }
            self.insert_alias(raw, canonical);
            added += 1;
        }
        Ok(added)
    }

    pub fn resolve(&self, raw: &str) -> Resolution<'_> {
        if let Some(targets) = self.aliases.get(raw) {
            let mut iter = targets.iter();
            return match (iter.next(), iter.next()) {
                (Some(only), None) => Resolution::Canonical(only.as_str()),
                _ => Resolution::Ambiguous(targets.iter().cloned().collect()),
            };
        }
        if self.excluded.contains(raw) {
            return Resolution::Excluded;
        }
        match self.canonical.get(raw) {
            Some(name) => Resolution::Canonical(name.as_str()),
            None => Resolution::Unmapped,
        }
    }

    pub fn is_canonical(&self, name: &str) -> bool {
        self.canonical.contains(name)
    }

    pub fn canonical_names(&self) -> impl Iterator<Item = &str> {
        self.canonical.iter().map(String::as_str)
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }
}

/// Alias table from an in-memory CSV, for tests and embedded tables.
pub fn aliases_from_str(csv: &str) -> Result<CountryAliases, DataError> {
    let mut aliases = CountryAliases::new();
    aliases.extend_from_reader(csv_reader(csv.as_bytes()), "aliases")?;
    Ok(aliases)
}
