//! The end-to-end run: load, normalize, merge, enrich, export.
//!
//! Every fallible input stage finishes before the first byte is written, and
//! the outputs are staged as temp files and committed together, so a fatal
//! error leaves no output behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

use covidlens_core::data::{
    load_cases, load_jhu_cases, load_policy, load_vaccinations, merge_sources, normalize_countries,
    CountryAliases, DataError, IngestOptions, JhuPaths, LoadStats, Loaded, PopulationLoad,
    PopulationTable, SourceKind, SourceTables, Warning, WarningKind,
};
use covidlens_core::domain::{CaseRow, MergedTable, PolicyRow, VaccinationRow};
use covidlens_core::export::{commit_all, stage_bytes, stage_merged};
use covidlens_core::fingerprint::FileHash;
use covidlens_core::metrics::{compute_metrics, CorrelationMatrix, CountrySummary};

use crate::config::{CasesSource, ConfigError, CountriesConfig, PipelineConfig};
use crate::manifest::{InputFingerprint, RunManifest};
use crate::report::render_summary;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
}

impl RunError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) => 1,
            RunError::Data(e) => e.exit_code(),
        }
    }
}

/// The four inputs, parsed but not yet normalized.
#[derive(Debug, Clone)]
pub struct RawInputs {
    pub cases: Loaded<CaseRow>,
    pub vaccinations: Loaded<VaccinationRow>,
    pub policy: Loaded<PolicyRow>,
    pub population: PopulationLoad,
}

/// Result of the in-memory stages; nothing has been written yet.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub table: MergedTable,
    pub summaries: Vec<CountrySummary>,
    pub correlations: CorrelationMatrix,
    pub warnings: Vec<Warning>,
    pub load_stats: BTreeMap<SourceKind, LoadStats>,
    /// Merged countries with no population value.
    pub missing_population: Vec<String>,
    /// Hashes of the input bytes this analysis was computed from.
    pub inputs: Vec<InputFingerprint>,
}

impl Analysis {
    pub fn warning_counts(&self) -> BTreeMap<WarningKind, usize> {
        count_warnings(&self.warnings)
    }
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub analysis: Analysis,
    pub manifest: RunManifest,
    pub merged_path: PathBuf,
    pub summary_path: PathBuf,
    pub manifest_path: Option<PathBuf>,
    pub elapsed_ms: u128,
}

/// Load, analyze and write every output of one run.
pub fn run_pipeline(config: &PipelineConfig) -> Result<RunReport, RunError> {
    let started = Instant::now();
    config.validate()?;

    let raw = load_inputs(config)?;
    let analysis = analyze(config, raw)?;
    let manifest = RunManifest::build(config, &analysis)?;
    let summary = render_summary(config, &analysis, &manifest);

    let mut staged = vec![stage_merged(&analysis.table, &config.output.merged)?];
    let manifest_path = if config.output.write_manifest {
        let path = config.manifest_path();
        staged.push(manifest.stage(&path)?);
        Some(path)
    } else {
        None
    };
    staged.push(stage_bytes(&config.output.summary, summary.as_bytes())?);
    commit_all(staged)?;
    tracing::info!(
        path = %config.output.merged.display(),
        records = analysis.table.len(),
        countries = analysis.table.country_count(),
        "wrote merged dataset"
    );

    let elapsed_ms = started.elapsed().as_millis();
    tracing::info!(elapsed_ms, warnings = analysis.warnings.len(), "run complete");

    Ok(RunReport {
        analysis,
        manifest,
        merged_path: config.output.merged.clone(),
        summary_path: config.output.summary.clone(),
        manifest_path,
        elapsed_ms,
    })
}

/// Read all four sources. With `loading.parallel` they run on the rayon pool
/// and the merge waits for all of them; errors are reported in source order.
pub fn load_inputs(config: &PipelineConfig) -> Result<RawInputs, DataError> {
    let opts = config.loading.ingest_options();
    let sources = &config.sources;

    let cases = || load_case_source(&sources.cases, &opts);
    let vaccinations = || load_vaccinations(&sources.vaccinations.path, &sources.vaccinations.schema, &opts);
    let policy = || load_policy(&sources.policy.path, &sources.policy.schema, &opts);
    let population = || PopulationTable::load(&sources.population.path, &sources.population.schema, &opts);

    let ((cases, vaccinations), (policy, population)) = if config.loading.parallel {
        rayon::join(
            || rayon::join(cases, vaccinations),
            || rayon::join(policy, population),
        )
    } else {
        ((cases(), vaccinations()), (policy(), population()))
    };

    let raw = RawInputs {
        cases: cases?,
        vaccinations: vaccinations?,
        policy: policy?,
        population: population?,
    };
    tracing::info!(
        cases = raw.cases.table.len(),
        vaccinations = raw.vaccinations.table.len(),
        policy = raw.policy.table.len(),
        population = raw.population.table.len(),
        "loaded sources"
    );
    Ok(raw)
}

fn load_case_source(source: &CasesSource, opts: &IngestOptions) -> Result<Loaded<CaseRow>, DataError> {
    match source {
        CasesSource::Long { path, schema } => load_cases(path, schema, opts),
        CasesSource::JhuWide {
            confirmed,
            deaths,
            recovered,
            schema,
        } => {
            let paths = JhuPaths {
                confirmed,
                deaths,
                recovered: recovered.as_deref(),
            };
            load_jhu_cases(paths, schema, opts)
        }
    }
}

/// Alias table for a run: built-ins, the alias file, exclusions, then every
/// population country and configured extra as canonical. Also returns the
/// hash of the alias file when one is configured.
pub fn build_aliases(
    countries: &CountriesConfig,
    population: &PopulationTable,
) -> Result<(CountryAliases, Option<FileHash>), DataError> {
    let mut aliases = if countries.builtin_aliases {
        CountryAliases::builtin()
    } else {
        CountryAliases::new()
    };
    let mut alias_file = None;
    if let Some(file) = &countries.alias_file {
        let (added, hash) = aliases.extend_from_csv(file)?;
        tracing::debug!(path = %file.display(), added, "loaded alias file");
        alias_file = Some(hash);
    }
    for name in &countries.exclude {
        aliases.add_excluded(name.as_str());
    }
    population.register_canonical(&mut aliases);
    for name in &countries.extra {
        aliases.add_canonical(name.as_str());
    }
    Ok((aliases, alias_file))
}

/// Normalize, merge and compute metrics over already-loaded inputs.
pub fn analyze(config: &PipelineConfig, raw: RawInputs) -> Result<Analysis, DataError> {
    let RawInputs {
        cases,
        vaccinations,
        policy,
        population,
    } = raw;

    let (aliases, alias_file) = build_aliases(&config.countries, &population.table)?;
    let roles = [
        (SourceKind::Cases.name(), &cases.files),
        (SourceKind::Vaccinations.name(), &vaccinations.files),
        (SourceKind::Policy.name(), &policy.files),
        (SourceKind::Population.name(), &population.files),
    ];
    let inputs = fingerprint_inputs(
        roles
            .into_iter()
            .flat_map(|(role, files)| files.iter().map(move |f| (role, f)))
            .chain(alias_file.iter().map(|f| ("aliases", f))),
    )?;

    let mut warnings = Vec::new();
    let mut load_stats = BTreeMap::new();

    let population_name = SourceKind::Population.name();
    let (population_table, population_warnings) = population.table.canonicalize(&aliases, population_name);
    load_stats.insert(SourceKind::Population, population.stats);
    warnings.extend(population.warnings);
    warnings.extend(population_warnings);

    let cases = normalize_countries(cases, &aliases, SourceKind::Cases.name());
    let vaccinations = normalize_countries(vaccinations, &aliases, SourceKind::Vaccinations.name());
    let policy = normalize_countries(policy, &aliases, SourceKind::Policy.name());
    for (kind, stats) in [
        (SourceKind::Cases, cases.stats),
        (SourceKind::Vaccinations, vaccinations.stats),
        (SourceKind::Policy, policy.stats),
    ] {
        load_stats.insert(kind, stats);
    }
    warnings.extend(cases.warnings);
    warnings.extend(vaccinations.warnings);
    warnings.extend(policy.warnings);

    let merged = merge_sources(
        SourceTables {
            cases: cases.table,
            vaccinations: vaccinations.table,
            policy: policy.table,
        },
        &population_table,
    );
    if !merged.missing_population.is_empty() {
        tracing::warn!(
            countries = merged.missing_population.len(),
            "merged countries without population; per-capita metrics are missing for them"
        );
    }

    let metrics = compute_metrics(merged.table, &config.analysis);
    warnings.extend(metrics.warnings);
    log_warning_summary(&warnings);

    Ok(Analysis {
        table: metrics.table,
        summaries: metrics.summaries,
        correlations: metrics.correlations,
        warnings,
        load_stats,
        missing_population: merged.missing_population,
        inputs,
    })
}

/// One fingerprint per distinct input file, in path order, listing every
/// source that read it. A file read twice must hash the same both times.
pub fn fingerprint_inputs<'a>(
    files: impl IntoIterator<Item = (&'static str, &'a FileHash)>,
) -> Result<Vec<InputFingerprint>, DataError> {
    let mut by_path: BTreeMap<&Path, InputFingerprint> = BTreeMap::new();
    for (role, file) in files {
        let entry = by_path.entry(file.path.as_path()).or_insert_with(|| InputFingerprint {
            path: file.path.display().to_string(),
            roles: Vec::new(),
            blake3: file.blake3.clone(),
        });
        if entry.blake3 != file.blake3 {
            return Err(DataError::data_format(
                role,
                format!("{} changed while it was being read", file.path.display()),
            ));
        }
        entry.roles.push(role.to_string());
    }
    Ok(by_path.into_values().collect())
}

pub fn count_warnings(warnings: &[Warning]) -> BTreeMap<WarningKind, usize> {
    let mut counts = BTreeMap::new();
    for w in warnings {
        *counts.entry(w.kind()).or_insert(0) += 1;
    }
    counts
}

fn log_warning_summary(warnings: &[Warning]) {
    for (kind, count) in count_warnings(warnings) {
        tracing::warn!(kind = kind.label(), count, "run warnings");
    }
    for w in warnings.iter().filter(|w| w.kind() != WarningKind::SkippedRow) {
        tracing::debug!("{w}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LongSource;
    use covidlens_core::domain::DatasetHash;
    use std::fs;
    use tempfile::TempDir;

    const CASES: &str = "\
location,date,total_cases,total_deaths
Testland,2020-01-01,10,1
Testland,2020-01-02,20,2
Testland,2020-01-03,30,3
US,2020-01-01,5,0
";

    const VACCINATIONS: &str = "\
location,date,total_vaccinations,people_fully_vaccinated_per_hundred
Testland,2020-01-02,100,0.5
Testland,2020-01-03,150,0.7
";

    const POLICY: &str = "\
CountryName,Jurisdiction,Date,StringencyIndex
Testland,NAT_TOTAL,20200101,10
Testland,NAT_TOTAL,20200102,20
Testland,NAT_TOTAL,20200103,30
";

    const POPULATION: &str = "\
location,date,population
Testland,2020-01-01,1000000
United States,2020-01-01,331000000
";

    fn config_in(dir: &Path) -> PipelineConfig {
        let write = |name: &str, body: &str| {
            let path = dir.join(name);
            fs::write(&path, body).unwrap();
            path
        };
        let mut config = PipelineConfig::default();
        config.sources.cases = CasesSource::Long {
            path: write("cases.csv", CASES),
            schema: Default::default(),
        };
        config.sources.vaccinations = LongSource::new(write("vacc.csv", VACCINATIONS));
        config.sources.policy = LongSource::new(write("policy.csv", POLICY));
        config.sources.population = LongSource::new(write("population.csv", POPULATION));
        config.output.merged = dir.join("out").join("merged.csv");
        config.output.summary = dir.join("out").join("summary.md");
        config
    }

    #[test]
    fn sequential_and_parallel_loads_agree() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        let parallel = analyze(&config, load_inputs(&config).unwrap()).unwrap();
        config.loading.parallel = false;
        let sequential = analyze(&config, load_inputs(&config).unwrap()).unwrap();
        assert_eq!(parallel.table, sequential.table);
        assert_eq!(parallel.warnings, sequential.warnings);
    }

    #[test]
    fn aliases_resolve_before_merge() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        let analysis = analyze(&config, load_inputs(&config).unwrap()).unwrap();
        let us = analysis.table.country("United States").unwrap();
        assert_eq!(us.records().len(), 1);
        assert_eq!(us.records()[0].population, Some(331_000_000));
        assert!(analysis.table.country("US").is_none());
        assert_eq!(analysis.table.len(), 4);
    }

    #[test]
    fn missing_source_fails_with_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        config.sources.policy.path = dir.path().join("nope.csv");
        let err = run_pipeline(&config).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(!config.output.merged.exists());
        assert!(!config.output.summary.exists());
    }

    #[test]
    fn shared_input_file_is_fingerprinted_once() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        let body = "\
location,date,total_vaccinations,people_fully_vaccinated_per_hundred,population
Testland,2020-01-02,100,0.5,1000000
Testland,2020-01-03,150,0.7,1000000
";
        let owid = dir.path().join("owid.csv");
        fs::write(&owid, body).unwrap();
        config.sources.vaccinations.path = owid.clone();
        config.sources.population.path = owid;

        let analysis = analyze(&config, load_inputs(&config).unwrap()).unwrap();
        assert_eq!(analysis.inputs.len(), 3);
        let shared = analysis.inputs.iter().find(|i| i.roles.len() == 2).unwrap();
        assert_eq!(shared.roles, vec!["vaccinations", "population"]);
        assert_eq!(shared.blake3, DatasetHash::from_bytes(body.as_bytes()));
    }

    #[test]
    fn fingerprints_come_from_the_bytes_loaded() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        let raw = load_inputs(&config).unwrap();
        // Rewriting a file after loading does not change what the run records.
        fs::write(&config.sources.policy.path, "CountryName,Jurisdiction,Date,StringencyIndex\n").unwrap();
        let analysis = analyze(&config, raw).unwrap();
        let policy = analysis.inputs.iter().find(|i| i.roles == ["policy"]).unwrap();
        assert_eq!(policy.blake3, DatasetHash::from_bytes(POLICY.as_bytes()));
    }

    #[test]
    fn diverging_reads_of_one_file_are_rejected() {
        let path = PathBuf::from("owid.csv");
        let first = FileHash {
            path: path.clone(),
            blake3: DatasetHash::from_bytes(b"before"),
        };
        let second = FileHash {
            path,
            blake3: DatasetHash::from_bytes(b"after"),
        };
        let err = fingerprint_inputs([("vaccinations", &first), ("population", &second)]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("changed while it was being read"));
    }

    #[test]
    fn unwritable_output_fails_without_partial_files() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        // A regular file where the summary directory should be.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        config.output.summary = blocker.join("summary.md");

        let err = run_pipeline(&config).unwrap_err();
        assert!(matches!(err, RunError::Data(DataError::Write { .. })));
        assert_eq!(err.exit_code(), 4);
        assert!(!config.output.merged.exists());
        assert!(!config.manifest_path().exists());
        let out = config.output.merged.parent().unwrap();
        assert_eq!(fs::read_dir(out).unwrap().count(), 0);
    }

    #[test]
    fn failed_rename_rolls_back_committed_outputs() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        fs::create_dir_all(&config.output.summary).unwrap();

        let err = run_pipeline(&config).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(!config.output.merged.exists());
        assert!(!config.manifest_path().exists());
        assert!(config.output.summary.is_dir());
    }

    #[test]
    fn exclusions_from_config_drop_rows() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        config.countries.exclude.push("Testland".into());
        let analysis = analyze(&config, load_inputs(&config).unwrap()).unwrap();
        assert!(analysis.table.country("Testland").is_none());
        assert_eq!(analysis.table.country_count(), 1);
    }
}
