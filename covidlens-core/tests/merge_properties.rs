//! Property tests for the merge and metrics stages.
//!
//! Uses proptest to verify:
//! 1. Key uniqueness and `(country, date)` order of the merged table
//! 2. The merged key set is the union of the source key sets
//! 3. Source fields pass through unchanged or stay missing
//! 4. Derived metrics are missing whenever an input is missing

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use covidlens_core::data::{merge_sources, PopulationTable, SourceTables};
use covidlens_core::domain::{CaseRow, PolicyRow, SourceKey, SourceTable, VaccinationRow};
use covidlens_core::metrics::{compute_metrics, MetricsConfig};

const COUNTRIES: [&str; 3] = ["Chile", "Norway", "Peru"];

fn key(country: usize, day: u32) -> SourceKey {
    let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    SourceKey::new(COUNTRIES[country], start + Duration::days(i64::from(day)))
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_keys() -> impl Strategy<Value = Vec<(usize, u32)>> {
    prop::collection::vec((0..COUNTRIES.len(), 0..20u32), 0..40)
}

fn arb_cases() -> impl Strategy<Value = SourceTable<CaseRow>> {
    prop::collection::vec(
        ((0..COUNTRIES.len(), 0..20u32), prop::option::of(0..10_000u64), prop::option::of(0..500u64)),
        0..40,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .map(|((c, d), confirmed, deaths)| {
                (
                    key(c, d),
                    CaseRow {
                        confirmed,
                        deaths,
                        recovered: None,
                    },
                )
            })
            .collect()
    })
}

fn arb_vaccinations() -> impl Strategy<Value = SourceTable<VaccinationRow>> {
    (arb_keys(), prop::option::of(0.0..5_000_000.0f64)).prop_map(|(keys, doses)| {
        keys.into_iter()
            .map(|(c, d)| {
                (
                    key(c, d),
                    VaccinationRow {
                        doses_administered: doses,
                        people_fully_vaccinated_per_hundred: None,
                    },
                )
            })
            .collect()
    })
}

fn arb_policy() -> impl Strategy<Value = SourceTable<PolicyRow>> {
    prop::collection::vec(((0..COUNTRIES.len(), 0..20u32), prop::option::of(0.0..100.0f64)), 0..40).prop_map(|rows| {
        rows.into_iter()
            .map(|((c, d), stringency_index)| (key(c, d), PolicyRow { stringency_index }))
            .collect()
    })
}

fn arb_population() -> impl Strategy<Value = PopulationTable> {
    prop::collection::btree_map(0..COUNTRIES.len(), 0..2_000_000u64, 0..=COUNTRIES.len())
        .prop_map(|m: BTreeMap<usize, u64>| PopulationTable::from_pairs(m.into_iter().map(|(c, p)| (COUNTRIES[c], p))))
}

// ── 1-3. Merge shape ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn merged_keys_are_unique_sorted_union(
        cases in arb_cases(),
        vaccinations in arb_vaccinations(),
        policy in arb_policy(),
        population in arb_population(),
    ) {
        let expected: BTreeSet<SourceKey> = cases
            .keys()
            .chain(vaccinations.keys())
            .chain(policy.keys())
            .cloned()
            .collect();

        let merged = merge_sources(
            SourceTables { cases: cases.clone(), vaccinations: vaccinations.clone(), policy: policy.clone() },
            &population,
        );
        let records = merged.table.records();

        prop_assert_eq!(records.len(), expected.len());
        for pair in records.windows(2) {
            prop_assert!((&pair[0].country, pair[0].date) < (&pair[1].country, pair[1].date));
        }
        let actual: BTreeSet<SourceKey> = records.iter().map(|r| r.key()).collect();
        prop_assert_eq!(actual, expected);

        for r in records {
            let k = r.key();
            prop_assert_eq!(r.confirmed, cases.get(&k).and_then(|c| c.confirmed));
            prop_assert_eq!(r.deaths, cases.get(&k).and_then(|c| c.deaths));
            prop_assert_eq!(r.doses_administered, vaccinations.get(&k).and_then(|v| v.doses_administered));
            prop_assert_eq!(r.stringency_index, policy.get(&k).and_then(|p| p.stringency_index));
            prop_assert_eq!(r.population, population.get(&r.country));
        }
    }
}

// ── 4. Missing propagation ───────────────────────────────────────────

proptest! {
    #[test]
    fn derived_metrics_missing_when_inputs_missing(
        cases in arb_cases(),
        vaccinations in arb_vaccinations(),
        policy in arb_policy(),
        population in arb_population(),
    ) {
        let merged = merge_sources(SourceTables { cases, vaccinations, policy }, &population);
        let out = compute_metrics(merged.table, &MetricsConfig::default());

        for r in out.table.records() {
            let d = &r.derived;
            let has_population = r.population.is_some_and(|p| p > 0);
            if !has_population {
                prop_assert!(d.cases_per_100k.is_none());
                prop_assert!(d.deaths_per_100k.is_none());
                prop_assert!(d.new_cases_per_100k.is_none());
                prop_assert!(d.vaccination_rate.is_none());
            }
            if r.confirmed.is_none() {
                prop_assert!(d.cases_per_100k.is_none());
                prop_assert!(d.new_cases.is_none());
            }
            if r.doses_administered.is_none() {
                prop_assert!(d.vaccination_rate.is_none());
                prop_assert!(!d.vaccination_rate_capped);
            }
            if d.new_cases.is_some() {
                let prev = out.table.get(&r.country, r.date - Duration::days(1));
                prop_assert!(prev.and_then(|p| p.confirmed).is_some());
            }
            if let Some(rate) = d.vaccination_rate {
                prop_assert!((0.0..=1.0).contains(&rate));
            }
        }
    }
}
