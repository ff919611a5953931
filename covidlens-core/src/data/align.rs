//! Country normalization and the outer join on `(country, date)`.
//!
//! Each source keeps its own dates; the merged timeline for a country is the
//! union of them. A source that did not report a key leaves its fields `None`.
//! Nothing is forward-filled or interpolated.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use super::aliases::{CountryAliases, Resolution};
use super::population::PopulationTable;
use super::source::{Loaded, Warning};
use crate::domain::{CaseRow, MergedRecord, MergedTable, PolicyRow, SourceKey, SourceTable, VaccinationRow};

/// Rewrite a loaded table's country names to canonical ones.
///
/// Rows whose name is ambiguous, excluded or unmapped are dropped. Each
/// distinct raw name is warned about once. Two raw names landing on the same
/// canonical key keep the first row in key order.
pub fn normalize_countries<T>(loaded: Loaded<T>, aliases: &CountryAliases, source_name: &str) -> Loaded<T> {
    let Loaded {
        table,
        mut stats,
        mut warnings,
        files,
    } = loaded;

    let mut resolved: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut normalized = SourceTable::new();
    let mut dropped = 0usize;

    for (key, row) in table {
        let canonical = resolved
            .entry(key.country.clone())
            .or_insert_with(|| {
                match aliases.resolve(&key.country) {
                    Resolution::Canonical(name) => Some(name.to_string()),
                    Resolution::Ambiguous(candidates) => {
                        warnings.push(Warning::AmbiguousCountry {
                            source_name: source_name.to_string(),
                            raw: key.country.clone(),
                            candidates,
                        });
                        None
                    }
                    Resolution::Excluded => {
                        tracing::debug!(source = source_name, country = %key.country, "excluded aggregate");
                        None
                    }
                    Resolution::Unmapped => {
                        warnings.push(Warning::UnmappedCountry {
                            source_name: source_name.to_string(),
                            raw: key.country.clone(),
                        });
                        None
                    }
                }
            })
            .clone();

        let Some(country) = canonical else {
            dropped += 1;
            continue;
        };
        match normalized.entry(SourceKey::new(country, key.date)) {
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
            Entry::Occupied(slot) => {
                stats.duplicates += 1;
                warnings.push(Warning::DuplicateKey {
                    source_name: source_name.to_string(),
                    country: slot.key().country.clone(),
                    date: Some(slot.key().date),
                });
            }
        }
    }

    let unresolved = resolved.values().filter(|c| c.is_none()).count();
    if unresolved > 0 {
        tracing::warn!(
            source = source_name,
            names = unresolved,
            rows = dropped,
            "dropped rows with unresolved country names"
        );
    }

    Loaded {
        table: normalized,
        stats,
        warnings,
        files,
    }
}

/// The three keyed sources after normalization.
#[derive(Debug, Clone, Default)]
pub struct SourceTables {
    pub cases: SourceTable<CaseRow>,
    pub vaccinations: SourceTable<VaccinationRow>,
    pub policy: SourceTable<PolicyRow>,
}

/// Result of the merge stage.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub table: MergedTable,
    /// Merged countries that have no population value.
    pub missing_population: Vec<String>,
}

/// Outer join of every source, with population attached per country.
pub fn merge_sources(tables: SourceTables, population: &PopulationTable) -> MergeOutput {
    let SourceTables {
        cases,
        vaccinations,
        policy,
    } = tables;

    let mut merged: BTreeMap<SourceKey, MergedRecord> = BTreeMap::new();

    for (key, row) in cases {
        let record = slot(&mut merged, population, key);
        record.confirmed = row.confirmed;
        record.deaths = row.deaths;
        record.recovered = row.recovered;
    }
    for (key, row) in vaccinations {
        let record = slot(&mut merged, population, key);
        record.doses_administered = row.doses_administered;
        record.people_fully_vaccinated_per_hundred = row.people_fully_vaccinated_per_hundred;
    }
    for (key, row) in policy {
        slot(&mut merged, population, key).stringency_index = row.stringency_index;
    }

    let missing_population: Vec<String> = merged
        .values()
        .filter(|r| r.population.is_none())
        .map(|r| r.country.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let table = MergedTable::from_sorted_unchecked(merged.into_values().collect());
    tracing::info!(
        records = table.len(),
        countries = table.country_count(),
        without_population = missing_population.len(),
        "merged sources"
    );
    MergeOutput {
        table,
        missing_population,
    }
}

fn slot<'m>(
    merged: &'m mut BTreeMap<SourceKey, MergedRecord>,
    population: &PopulationTable,
    key: SourceKey,
) -> &'m mut MergedRecord {
    merged.entry(key).or_insert_with_key(|k| MergedRecord {
        population: population.get(&k.country),
        ..MergedRecord::empty(k.country.clone(), k.date)
    })
}
