//! End-to-end scenarios through the core stages: load, normalize, merge,
//! enrich, export and re-load.

use chrono::NaiveDate;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use covidlens_core::data::{
    load_cases, load_jhu_cases, load_policy, load_vaccinations, merge_sources, normalize_countries,
    CaseSchema, CountryAliases, DataError, IngestOptions, JhuPaths, PolicySchema, PopulationTable,
    SourceTables, VaccinationSchema, WideSchema,
};
use covidlens_core::domain::MergedTable;
use covidlens_core::export::{export_merged, read_merged};
use covidlens_core::metrics::{compute_metrics, MetricsConfig};

// ── Helpers ──────────────────────────────────────────────────────────

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

struct Fixture {
    _dir: TempDir,
    cases: PathBuf,
    vaccinations: PathBuf,
    policy: PathBuf,
}

fn small_fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let cases = write(
        dir.path(),
        "cases.csv",
        "location,date,total_cases,total_deaths\n\
         X,2020-01-01,10,0\n\
         X,2020-01-02,20,1\n\
         X,2020-01-03,30,2\n",
    );
    let vaccinations = write(
        dir.path(),
        "vaccinations.csv",
        "location,date,total_vaccinations,people_fully_vaccinated_per_hundred\n\
         X,2020-01-02,100,\n\
         X,2020-01-03,250,0.1\n",
    );
    let policy = write(
        dir.path(),
        "policy.csv",
        "CountryName,Jurisdiction,Date,StringencyIndex\n\
         X,NAT_TOTAL,20200101,11.1\n\
         X,NAT_TOTAL,20200102,22.2\n\
         X,NAT_TOTAL,20200103,33.3\n\
         X,STATE_TOTAL,20200103,99.9\n",
    );
    Fixture {
        _dir: dir,
        cases,
        vaccinations,
        policy,
    }
}

fn merge_fixture(f: &Fixture, population: &PopulationTable) -> MergedTable {
    let opts = IngestOptions::default();
    let mut aliases = CountryAliases::builtin();
    population.register_canonical(&mut aliases);
    aliases.add_canonical("X");

    let cases = normalize_countries(load_cases(&f.cases, &CaseSchema::default(), &opts).unwrap(), &aliases, "cases");
    let vaccinations = normalize_countries(
        load_vaccinations(&f.vaccinations, &VaccinationSchema::default(), &opts).unwrap(),
        &aliases,
        "vaccinations",
    );
    let policy = normalize_countries(
        load_policy(&f.policy, &PolicySchema::default(), &opts).unwrap(),
        &aliases,
        "policy",
    );
    merge_sources(
        SourceTables {
            cases: cases.table,
            vaccinations: vaccinations.table,
            policy: policy.table,
        },
        population,
    )
    .table
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn three_sources_merge_into_one_row_per_day() {
    let f = small_fixture();
    let population = PopulationTable::from_pairs([("X", 1_000_000u64)]);
    let table = merge_fixture(&f, &population);

    assert_eq!(table.len(), 3);
    let first = table.get("X", date(2020, 1, 1)).unwrap();
    assert_eq!(first.confirmed, Some(10));
    assert_eq!(first.doses_administered, None);
    assert_eq!(first.stringency_index, Some(11.1));

    let second = table.get("X", date(2020, 1, 2)).unwrap();
    assert_eq!(second.doses_administered, Some(100.0));
    assert_eq!(second.people_fully_vaccinated_per_hundred, None);

    let third = table.get("X", date(2020, 1, 3)).unwrap();
    assert_eq!(third.stringency_index, Some(33.3));
    assert_eq!(third.population, Some(1_000_000));

    let out = compute_metrics(table, &MetricsConfig::default());
    let r = out.table.get("X", date(2020, 1, 2)).unwrap();
    assert_eq!(r.derived.new_cases, Some(10.0));
    assert!((r.derived.cases_per_100k.unwrap() - 2.0).abs() < 1e-9);
    assert_eq!(r.derived.vaccination_rate, Some(0.0001));
}

#[test]
fn absent_population_leaves_per_capita_missing() {
    let f = small_fixture();
    let table = merge_fixture(&f, &PopulationTable::default());
    let out = compute_metrics(table, &MetricsConfig::default());
    for r in out.table.records() {
        assert_eq!(r.population, None);
        assert_eq!(r.derived.cases_per_100k, None);
        assert_eq!(r.derived.deaths_per_100k, None);
        assert_eq!(r.derived.vaccination_rate, None);
    }
    assert_eq!(out.table.get("X", date(2020, 1, 3)).unwrap().derived.new_cases, Some(10.0));
}

#[test]
fn exported_table_reloads_identically() {
    let f = small_fixture();
    let population = PopulationTable::from_pairs([("X", 3_000_000u64)]);
    let out = compute_metrics(merge_fixture(&f, &population), &MetricsConfig::default());

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("merged_covid_dataset.csv");
    export_merged(&out.table, &path).unwrap();
    let leftovers: Vec<_> = fs::read_dir(dir.path().join("nested")).unwrap().collect();
    assert_eq!(leftovers.len(), 1);

    let reloaded = read_merged(&path).unwrap();
    assert_eq!(reloaded, out.table);

    export_merged(&out.table, &path).unwrap();
    assert_eq!(read_merged(&path).unwrap(), reloaded);
}

fn cases_with_bad_rows(total: usize, bad: usize) -> String {
    let mut body = String::from("location,date,total_cases,total_deaths\n");
    let start = date(2020, 3, 1);
    for i in 0..total {
        if i < bad {
            writeln!(body, "X,not-a-date,{i},0").unwrap();
        } else {
            writeln!(body, "X,{},{i},0", start + chrono::Duration::days(i as i64)).unwrap();
        }
    }
    body
}

#[test]
fn skip_fraction_above_limit_is_fatal() {
    let dir = TempDir::new().unwrap();
    let opts = IngestOptions::default();

    let path = write(dir.path(), "six.csv", &cases_with_bad_rows(100, 6));
    let err = load_cases(&path, &CaseSchema::default(), &opts).unwrap_err();
    assert!(matches!(err, DataError::DataFormat { .. }));
    assert_eq!(err.exit_code(), 2);

    let path = write(dir.path(), "five.csv", &cases_with_bad_rows(100, 5));
    let loaded = load_cases(&path, &CaseSchema::default(), &opts).unwrap();
    assert_eq!(loaded.stats.rows_skipped, 5);
    assert_eq!(loaded.table.len(), 95);
    assert_eq!(loaded.warnings.len(), 5);
}

#[test]
fn missing_file_is_source_unavailable() {
    let err = load_cases(Path::new("/nonexistent/cases.csv"), &CaseSchema::default(), &IngestOptions::default())
        .unwrap_err();
    assert!(matches!(err, DataError::SourceUnavailable { .. }));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn jhu_wide_files_feed_the_same_merge() {
    let dir = TempDir::new().unwrap();
    let header = "Province/State,Country/Region,Lat,Long,1/1/20,1/2/20\n";
    let confirmed = write(
        dir.path(),
        "confirmed.csv",
        &format!("{header},\"Korea, South\",36,128,1,3\nA,Canada,0,0,2,2\nB,Canada,0,0,1,4\n"),
    );
    let deaths = write(
        dir.path(),
        "deaths.csv",
        &format!("{header},\"Korea, South\",36,128,0,0\nA,Canada,0,0,0,1\nB,Canada,0,0,0,0\n"),
    );
    let paths = JhuPaths {
        confirmed: &confirmed,
        deaths: &deaths,
        recovered: None,
    };
    let loaded = load_jhu_cases(paths, &WideSchema::default(), &IngestOptions::default()).unwrap();

    let population = PopulationTable::from_pairs([("South Korea", 51_000_000u64), ("Canada", 38_000_000)]);
    let mut aliases = CountryAliases::builtin();
    population.register_canonical(&mut aliases);
    let cases = normalize_countries(loaded, &aliases, "cases");
    assert!(cases.warnings.is_empty());

    let table = merge_sources(
        SourceTables {
            cases: cases.table,
            ..SourceTables::default()
        },
        &population,
    )
    .table;
    assert_eq!(table.country_count(), 2);
    let canada = table.get("Canada", date(2020, 1, 2)).unwrap();
    assert_eq!(canada.confirmed, Some(6));
    assert_eq!(canada.deaths, Some(1));
    assert_eq!(table.get("South Korea", date(2020, 1, 2)).unwrap().confirmed, Some(3));
}
