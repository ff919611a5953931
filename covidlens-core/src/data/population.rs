//! Population reference, one value per country.

use chrono::NaiveDate;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use super::aliases::{CountryAliases, Resolution};
use super::ingest::{cell, for_each_record, load_hashed, parse_count, parse_date, read_headers, source_label, IngestOptions, SkipLog};
use super::schema::{require_column, optional_column, PopulationSchema};
use super::source::{DataError, LoadStats, SourceKind, Warning};
use crate::fingerprint::FileHash;

/// Country → population.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulationTable {
    values: BTreeMap<String, u64>,
}

/// A loaded population file with its accounting.
#[derive(Debug, Clone, Default)]
pub struct PopulationLoad {
    pub table: PopulationTable,
    pub stats: LoadStats,
    pub warnings: Vec<Warning>,
    pub files: Vec<FileHash>,
}

impl PopulationTable {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            values: pairs.into_iter().map(|(c, p)| (c.into(), p)).collect(),
        }
    }

    pub fn load(
        path: &Path,
        schema: &PopulationSchema,
        opts: &IngestOptions,
    ) -> Result<PopulationLoad, DataError> {
        let source_name = source_label(SourceKind::Population.name(), path);
        let (mut loaded, file) = load_hashed(path, &source_name, |rdr| Self::read(rdr, &source_name, schema, opts))?;
        loaded.files.push(file);
        Ok(loaded)
    }

    /// Read a population file.
    ///
    /// With a date column the most recent dated, non-missing value per country
    /// wins (the OWID layout repeats population on every daily row). Without
    /// one the first non-missing value wins and later values are duplicates.
    pub fn read<R: Read>(
        mut rdr: csv::Reader<R>,
        source_name: &str,
        schema: &PopulationSchema,
        opts: &IngestOptions,
    ) -> Result<PopulationLoad, DataError> {
        let headers = read_headers(&mut rdr, source_name)?;
        let country_idx = require_column(&headers, &schema.country_column, source_name)?;
        let population_idx = require_column(&headers, &schema.population_column, source_name)?;
        let date_idx = optional_column(&headers, schema.date_column.as_deref(), source_name)?;

        let mut log = SkipLog::new(source_name);
        let mut latest: BTreeMap<String, (Option<NaiveDate>, u64)> = BTreeMap::new();

        for_each_record(&mut rdr, &mut log, |record, line, log| {
            let country = cell(record, country_idx);
            if country.is_empty() {
                log.skip(line, "empty country".into());
                return;
            }
            let date = match date_idx.map(|i| parse_date(cell(record, i), &schema.date_format)).transpose() {
                Ok(date) => date,
                Err(reason) => return log.skip(line, reason),
            };
            let value = match parse_count(cell(record, population_idx)) {
                Ok(Some(value)) => value,
                Ok(None) => {
                    log.stats.rows_filtered += 1;
                    return;
                }
                Err(reason) => return log.skip(line, format!("population: {reason}")),
            };
            log.stats.rows_loaded += 1;
            match latest.entry(country.to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert((date, value));
                }
                Entry::Occupied(mut slot) => match (slot.get().0, date) {
                    (Some(seen), Some(new)) if new > seen => {
                        slot.insert((date, value));
                    }
                    (Some(_), Some(_)) => {}
                    _ => {
                        log.stats.duplicates += 1;
                        log.warnings.push(Warning::DuplicateKey {
                            source_name: source_name.to_string(),
                            country: country.to_string(),
                            date,
                        });
                    }
                },
            }
        })?;

        log.finish(opts)?;
        let table = Self {
            values: latest.into_iter().map(|(c, (_, v))| (c, v)).collect(),
        };
        tracing::info!(source = source_name, countries = table.len(), "loaded population");
        Ok(PopulationLoad {
            table,
            stats: log.stats,
            warnings: log.warnings,
            files: Vec::new(),
        })
    }

    pub fn get(&self, country: &str) -> Option<u64> {
        self.values.get(country).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn countries(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Register every listed country as canonical (aggregates and aliases are ignored).
    pub fn register_canonical(&self, aliases: &mut CountryAliases) {
        for country in self.countries() {
            aliases.add_canonical(country);
        }
    }

    /// Re-key the table by canonical name. Unresolvable names are dropped.
    pub fn canonicalize(self, aliases: &CountryAliases, source_name: &str) -> (Self, Vec<Warning>) {
        let mut values = BTreeMap::new();
        let mut warnings = Vec::new();
        for (raw, population) in self.values {
            match aliases.resolve(&raw) {
                Resolution::Canonical(name) => match values.entry(name.to_string()) {
                    Entry::Vacant(slot) => {
                        slot.insert(population);
                    }
                    Entry::Occupied(_) => warnings.push(Warning::DuplicateKey {
                        source_name: source_name.to_string(),
                        country: name.to_string(),
                        date: None,
                    }),
                },
                Resolution::Ambiguous(candidates) => warnings.push(Warning::AmbiguousCountry {
                    source_name: source_name.to_string(),
                    raw,
                    candidates,
                }),
                Resolution::Excluded => {}
                Resolution::Unmapped => warnings.push(Warning::UnmappedCountry {
                    source_name: source_name.to_string(),
                    raw,
                }),
            }
        }
        (Self { values }, warnings)
    }
}
