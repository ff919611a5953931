//! End-to-end runs of the pipeline over small on-disk fixtures.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use covidlens_core::data::WarningKind;
use covidlens_core::export::{read_merged, MERGED_COLUMNS};
use covidlens_runner::{run_pipeline, PipelineConfig, RunError, RunManifest, SCHEMA_VERSION};

// ── Fixtures ─────────────────────────────────────────────────────────

/// 40 days for two countries, JHU wide cases, OWID vaccinations and
/// population, OxCGRT policy.
fn write_fixtures(dir: &Path) {
    let days: Vec<chrono::NaiveDate> = (0..40)
        .map(|i| chrono::NaiveDate::from_ymd_opt(2020, 3, 1).unwrap() + chrono::Duration::days(i))
        .collect();

    let mut header = String::from("Province/State,Country/Region,Lat,Long");
    for d in &days {
        write!(header, ",{}", d.format("%-m/%-d/%y")).unwrap();
    }
    let wide_row = |province: &str, country: &str, f: &dyn Fn(usize) -> u64| {
        let mut row = format!("{province},{country},0,0");
        for i in 0..days.len() {
            write!(row, ",{}", f(i)).unwrap();
        }
        row
    };
    let confirmed = [
        header.clone(),
        wide_row("", "Alpha", &|i| (i * i) as u64 + 10),
        wide_row("", "US", &|i| 100 + 7 * i as u64 + (i % 5) as u64 * 3),
        wide_row("", "Diamond Princess", &|_| 700),
    ]
    .join("\n");
    let deaths = [
        header.clone(),
        wide_row("", "Alpha", &|i| i as u64 / 3),
        wide_row("", "US", &|i| i as u64),
        wide_row("", "Diamond Princess", &|_| 13),
    ]
    .join("\n");
    fs::write(dir.join("confirmed.csv"), confirmed + "\n").unwrap();
    fs::write(dir.join("deaths.csv"), deaths + "\n").unwrap();

    let mut owid = String::from("location,date,total_vaccinations,people_fully_vaccinated_per_hundred,population\n");
    for (i, d) in days.iter().enumerate().skip(20) {
        writeln!(owid, "Alpha,{d},{},{:.2},2000000", i * 1000, i as f64 * 0.1).unwrap();
        writeln!(owid, "United States,{d},{},{:.2},331000000", i * 50_000, i as f64 * 0.2).unwrap();
    }
    writeln!(owid, "World,{},1,0.1,7800000000", days[39]).unwrap();
    fs::write(dir.join("owid.csv"), owid).unwrap();

    let mut policy = String::from("CountryName,Jurisdiction,Date,StringencyIndex\n");
    for (i, d) in days.iter().enumerate() {
        let date = d.format("%Y%m%d");
        writeln!(policy, "Alpha,NAT_TOTAL,{date},{}", (i % 9) as f64 * 10.0).unwrap();
        writeln!(policy, "United States,NAT_TOTAL,{date},{}", 20.0 + (i % 4) as f64 * 5.0).unwrap();
        writeln!(policy, "United States,STATE_TOTAL,{date},99").unwrap();
    }
    fs::write(dir.join("policy.csv"), policy).unwrap();
}

fn config_toml(dir: &Path) -> String {
    let p = |name: &str| dir.join(name).display().to_string().replace('\\', "/");
    format!(
        r#"
[sources.cases]
layout = "jhu_wide"
confirmed = "{confirmed}"
deaths = "{deaths}"

[sources.vaccinations]
path = "{owid}"

[sources.policy]
path = "{policy}"

[sources.population]
path = "{owid}"

[analysis]
min_observations = 10

[output]
merged = "{merged}"
summary = "{summary}"
"#,
        confirmed = p("confirmed.csv"),
        deaths = p("deaths.csv"),
        owid = p("owid.csv"),
        policy = p("policy.csv"),
        merged = p("out/merged_covid_dataset.csv"),
        summary = p("out/summary.md"),
    )
}

fn setup() -> (TempDir, PipelineConfig) {
    let dir = TempDir::new().unwrap();
    write_fixtures(dir.path());
    let config_path = dir.path().join("covidlens.toml");
    fs::write(&config_path, config_toml(dir.path())).unwrap();
    let config = PipelineConfig::from_file(&config_path).unwrap();
    (dir, config)
}

fn out(dir: &Path, name: &str) -> PathBuf {
    dir.join("out").join(name)
}

// ── Tests ────────────────────────────────────────────────────────────

#[test]
fn full_run_writes_all_outputs() {
    let (dir, config) = setup();
    let report = run_pipeline(&config).unwrap();

    let merged = out(dir.path(), "merged_covid_dataset.csv");
    let manifest = out(dir.path(), "merged_covid_dataset.manifest.json");
    let summary = out(dir.path(), "summary.md");
    assert!(merged.exists());
    assert!(manifest.exists());
    assert!(summary.exists());

    let text = fs::read_to_string(&merged).unwrap();
    assert_eq!(text.lines().next().unwrap(), MERGED_COLUMNS.join(","));

    let table = read_merged(&merged).unwrap();
    assert_eq!(table.len(), 80);
    assert_eq!(table.country_count(), 2);
    assert!(table.country("United States").is_some());
    assert!(table.country("Diamond Princess").is_none());
    assert_eq!(table, report.analysis.table);

    let us = table.country("United States").unwrap();
    assert_eq!(us.records()[0].population, Some(331_000_000));
    assert_eq!(us.records()[0].stringency_index, Some(20.0));
    assert_eq!(us.records()[0].doses_administered, None);

    let m = RunManifest::read(&manifest).unwrap();
    assert_eq!(m.schema_version, SCHEMA_VERSION);
    assert_eq!(m.output.records, 80);
    assert_eq!(m.inputs.len(), 4);
    assert_eq!(m, report.manifest);

    let md = fs::read_to_string(&summary).unwrap();
    assert!(md.contains("## Top 2 countries by confirmed cases"));
    assert!(md.contains("| United States |"));
    assert!(md.contains("## Correlation matrix"));
}

#[test]
fn repeated_runs_are_byte_identical() {
    let (dir, config) = setup();
    run_pipeline(&config).unwrap();
    let names = ["merged_covid_dataset.csv", "merged_covid_dataset.manifest.json", "summary.md"];
    let first: Vec<Vec<u8>> = names.iter().map(|n| fs::read(out(dir.path(), n)).unwrap()).collect();

    let mut sequential = config.clone();
    sequential.loading.parallel = false;
    run_pipeline(&config).unwrap();
    let second: Vec<Vec<u8>> = names.iter().map(|n| fs::read(out(dir.path(), n)).unwrap()).collect();
    assert_eq!(first, second);

    // The manifest records the configuration, so only the data must match.
    run_pipeline(&sequential).unwrap();
    assert_eq!(fs::read(out(dir.path(), names[0])).unwrap(), first[0]);
}

#[test]
fn lag_correlation_is_reported_when_enough_pairs() {
    let (_dir, config) = setup();
    let report = run_pipeline(&config).unwrap();
    let alpha = report
        .analysis
        .summaries
        .iter()
        .find(|s| s.country == "Alpha")
        .unwrap();
    // Days 14..=39 have both a new-case figure and stringency 14 days earlier.
    assert_eq!(alpha.lag_correlation.observations, 26);
    assert!(alpha.lag_correlation.is_defined());
    assert!(report.manifest.warnings.get(&WarningKind::InsufficientData).is_none());
}

#[test]
fn too_many_bad_rows_aborts_without_output() {
    let (dir, config) = setup();
    let mut policy = fs::read_to_string(dir.path().join("policy.csv")).unwrap();
    for _ in 0..10 {
        policy.push_str("Alpha,NAT_TOTAL,notadate,10\n");
    }
    fs::write(dir.path().join("policy.csv"), policy).unwrap();

    let err = run_pipeline(&config).unwrap_err();
    assert!(matches!(err, RunError::Data(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(!out(dir.path(), "merged_covid_dataset.csv").exists());
    assert!(!out(dir.path(), "summary.md").exists());
}

#[test]
fn invalid_config_exits_with_one() {
    let (_dir, mut config) = setup();
    config.analysis.rolling_window = 0;
    let err = run_pipeline(&config).unwrap_err();
    assert!(matches!(err, RunError::Config(_)));
    assert_eq!(err.exit_code(), 1);
}
