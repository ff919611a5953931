//! Serializable pipeline configuration.
//!
//! Every section is `#[serde(default)]`, so a TOML file only needs the keys it
//! changes. Defaults point at the files `covidlens download` fetches into
//! `data/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use covidlens_core::data::{
    CaseSchema, IngestOptions, PolicySchema, PopulationSchema, VaccinationSchema, WideSchema,
    DEFAULT_MAX_SKIP_FRACTION,
};
use covidlens_core::export::DEFAULT_OUTPUT_FILE;
use covidlens_core::metrics::{MetricsConfig, MAX_LAG_DAYS};

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },

    #[error("invalid config TOML: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("cannot serialize config: {0}")]
    Serialize(String),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Complete configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub sources: SourcesConfig,
    pub countries: CountriesConfig,
    pub analysis: MetricsConfig,
    pub loading: LoadingConfig,
    pub output: OutputConfig,
}

/// Where each input lives and how its columns are named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub cases: CasesSource,
    pub vaccinations: LongSource<VaccinationSchema>,
    pub policy: LongSource<PolicySchema>,
    pub population: LongSource<PopulationSchema>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        let data = Path::new("data");
        Self {
            cases: CasesSource::default(),
            vaccinations: LongSource::new(data.join("owid-covid-data.csv")),
            policy: LongSource::new(data.join("OxCGRT_latest.csv")),
            population: LongSource::new(data.join("owid-covid-data.csv")),
        }
    }
}

/// One long-layout file and its schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongSource<S> {
    pub path: PathBuf,
    #[serde(default)]
    pub schema: S,
}

impl<S: Default> LongSource<S> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema: S::default(),
        }
    }
}

/// Case counts come either as one long file or as Johns Hopkins per-measure files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum CasesSource {
    Long {
        path: PathBuf,
        #[serde(default)]
        schema: CaseSchema,
    },
    JhuWide {
        confirmed: PathBuf,
        deaths: PathBuf,
        #[serde(default)]
        recovered: Option<PathBuf>,
        #[serde(default)]
        schema: WideSchema,
    },
}

impl Default for CasesSource {
    fn default() -> Self {
        let data = Path::new("data");
        CasesSource::JhuWide {
            confirmed: data.join("time_series_covid19_confirmed_global.csv"),
            deaths: data.join("time_series_covid19_deaths_global.csv"),
            recovered: Some(data.join("time_series_covid19_recovered_global.csv")),
            schema: WideSchema::default(),
        }
    }
}

impl CasesSource {
    /// Every file this source reads.
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            CasesSource::Long { path, .. } => vec![path.as_path()],
            CasesSource::JhuWide {
                confirmed,
                deaths,
                recovered,
                ..
            } => {
                let mut paths = vec![confirmed.as_path(), deaths.as_path()];
                paths.extend(recovered.as_deref());
                paths
            }
        }
    }
}

/// Country-name normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountriesConfig {
    /// Apply the built-in alias and aggregate tables.
    pub builtin_aliases: bool,
    /// Extra `raw,canonical` CSV.
    pub alias_file: Option<PathBuf>,
    /// Canonical names accepted even without a population entry.
    pub extra: Vec<String>,
    /// Names dropped as aggregates.
    pub exclude: Vec<String>,
}

impl Default for CountriesConfig {
    fn default() -> Self {
        Self {
            builtin_aliases: true,
            alias_file: None,
            extra: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadingConfig {
    /// Tolerated share of unparseable rows per source.
    pub max_skip_fraction: f64,
    /// Run the loaders on the rayon pool.
    pub parallel: bool,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            max_skip_fraction: DEFAULT_MAX_SKIP_FRACTION,
            parallel: true,
        }
    }
}

impl LoadingConfig {
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            max_skip_fraction: self.max_skip_fraction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub merged: PathBuf,
    pub summary: PathBuf,
    pub write_manifest: bool,
    /// Countries shown in the top-countries table.
    pub top_countries: usize,
    /// Rows in the deaths-vs-vaccination table.
    pub top_impacted: usize,
    /// Population floor for the deaths-vs-vaccination table.
    pub min_population: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            merged: PathBuf::from(DEFAULT_OUTPUT_FILE),
            summary: PathBuf::from("summary.md"),
            write_manifest: true,
            top_countries: 6,
            top_impacted: 20,
            min_population: 1_000_000,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let skip = self.loading.max_skip_fraction;
        if !(0.0..=1.0).contains(&skip) {
            return Err(ConfigError::invalid("loading.max_skip_fraction", format!("{skip} is outside [0, 1]")));
        }
        let a = &self.analysis;
        if a.min_observations < 2 {
            return Err(ConfigError::invalid("analysis.min_observations", "must be at least 2"));
        }
        if a.lag_days > MAX_LAG_DAYS {
            return Err(ConfigError::invalid(
                "analysis.lag_days",
                format!("{} exceeds {MAX_LAG_DAYS} days", a.lag_days),
            ));
        }
        if a.max_lag_scan > MAX_LAG_DAYS {
            return Err(ConfigError::invalid(
                "analysis.max_lag_scan",
                format!("{} exceeds {MAX_LAG_DAYS} days", a.max_lag_scan),
            ));
        }
        if a.rolling_window == 0 {
            return Err(ConfigError::invalid("analysis.rolling_window", "must be at least 1"));
        }
        if !(a.vaccination_upper_bound.is_finite() && a.vaccination_upper_bound > 0.0) {
            return Err(ConfigError::invalid(
                "analysis.vaccination_upper_bound",
                format!("{} is not a positive number", a.vaccination_upper_bound),
            ));
        }
        if self.output.merged == self.output.summary {
            return Err(ConfigError::invalid("output.summary", "must differ from output.merged"));
        }
        Ok(())
    }

    /// Sidecar manifest path: `merged_covid_dataset.manifest.json` next to the CSV.
    pub fn manifest_path(&self) -> PathBuf {
        let stem = self
            .output
            .merged
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "merged".into());
        self.output.merged.with_file_name(format!("{stem}.manifest.json"))
    }
}

/// Command-line values layered over a loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Long cases file, or the JHU confirmed file when `deaths` is also set.
    pub cases: Option<PathBuf>,
    pub deaths: Option<PathBuf>,
    pub recovered: Option<PathBuf>,
    pub vaccinations: Option<PathBuf>,
    pub policy: Option<PathBuf>,
    pub population: Option<PathBuf>,
    pub merged: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub lag_days: Option<u32>,
    pub min_observations: Option<usize>,
    pub max_skip_fraction: Option<f64>,
    pub sequential: bool,
}

impl ConfigOverrides {
    /// Apply every set value, then re-validate.
    pub fn apply(self, config: &mut PipelineConfig) -> Result<(), ConfigError> {
        match (self.cases, self.deaths) {
            (Some(confirmed), Some(deaths)) => {
                let schema = match &config.sources.cases {
                    CasesSource::JhuWide { schema, .. } => schema.clone(),
                    CasesSource::Long { .. } => WideSchema::default(),
                };
                config.sources.cases = CasesSource::JhuWide {
                    confirmed,
                    deaths,
                    recovered: self.recovered,
                    schema,
                };
            }
            (Some(path), None) => {
                if self.recovered.is_some() {
                    return Err(ConfigError::invalid("--recovered", "requires --cases and --deaths"));
                }
                let schema = match &config.sources.cases {
                    CasesSource::Long { schema, .. } => schema.clone(),
                    CasesSource::JhuWide { .. } => CaseSchema::default(),
                };
                config.sources.cases = CasesSource::Long { path, schema };
            }
            (None, Some(_)) => return Err(ConfigError::invalid("--deaths", "requires --cases")),
            (None, None) => {
                if self.recovered.is_some() {
                    return Err(ConfigError::invalid("--recovered", "requires --cases and --deaths"));
                }
            }
        }

        let sources = &mut config.sources;
        if let Some(path) = self.vaccinations {
            sources.vaccinations.path = path;
        }
        if let Some(path) = self.policy {
            sources.policy.path = path;
        }
        if let Some(path) = self.population {
            sources.population.path = path;
        }
        if let Some(path) = self.merged {
            config.output.merged = path;
        }
        if let Some(path) = self.summary {
            config.output.summary = path;
        }
        if let Some(lag) = self.lag_days {
            config.analysis.lag_days = lag;
        }
        if let Some(n) = self.min_observations {
            config.analysis.min_observations = n;
        }
        if let Some(f) = self.max_skip_fraction {
            config.loading.max_skip_fraction = f;
        }
        if self.sequential {
            config.loading.parallel = false;
        }
        config.validate()
    }
}
