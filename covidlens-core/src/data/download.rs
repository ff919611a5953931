//! Fetch the public datasets into a local data directory.
//!
//! Files already present are left alone unless `force` is set. Each body is
//! written atomically, so an interrupted download never leaves a truncated
//! CSV behind for the loaders to trip over.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::source::DataError;
use crate::export::write_atomic_bytes;

/// One downloadable dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetSpec {
    pub name: &'static str,
    pub url: &'static str,
    pub file_name: &'static str,
}

pub const DEFAULT_DATASETS: [DatasetSpec; 5] = [
    DatasetSpec {
        name: "Johns Hopkins confirmed",
        url: "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series/time_series_covid19_confirmed_global.csv",
        file_name: "time_series_covid19_confirmed_global.csv",
    },
    DatasetSpec {
        name: "Johns Hopkins deaths",
        url: "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series/time_series_covid19_deaths_global.csv",
        file_name: "time_series_covid19_deaths_global.csv",
    },
    DatasetSpec {
        name: "Johns Hopkins recovered",
        url: "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series/time_series_covid19_recovered_global.csv",
        file_name: "time_series_covid19_recovered_global.csv",
    },
    DatasetSpec {
        name: "Our World in Data",
        url: "https://covid.ourworldindata.org/data/owid-covid-data.csv",
        file_name: "owid-covid-data.csv",
    },
    DatasetSpec {
        name: "Oxford policy tracker",
        url: "https://raw.githubusercontent.com/OxCGRT/covid-policy-tracker/master/data/OxCGRT_latest.csv",
        file_name: "OxCGRT_latest.csv",
    },
];

/// Source of dataset bodies. The HTTP implementation is the only production one.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, dataset: &DatasetSpec) -> Result<Vec<u8>, DataError>;
}

/// Blocking HTTP fetcher with a per-request timeout and retry on transient failures.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpFetcher {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(timeout: Duration) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("covidlens/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::unavailable("http client", e.to_string()))?;
        Ok(Self {
            client,
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, dataset: &DatasetSpec) -> Result<Vec<u8>, DataError> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.base_delay * 2u32.pow(attempt - 1));
                tracing::debug!(dataset = dataset.name, attempt, "retrying download");
            }
            match self.client.get(dataset.url).send() {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .bytes()
                        .map(|b| b.to_vec())
                        .map_err(|e| DataError::unavailable(dataset.name, e.to_string()));
                }
                Ok(resp) if resp.status().is_server_error() => {
                    last_error = Some(DataError::unavailable(dataset.name, format!("HTTP {}", resp.status())));
                }
                Ok(resp) => {
                    return Err(DataError::unavailable(dataset.name, format!("HTTP {}", resp.status())));
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(DataError::unavailable(dataset.name, e.to_string()));
                }
                Err(e) => return Err(DataError::unavailable(dataset.name, e.to_string())),
            }
        }
        Err(last_error.unwrap_or_else(|| DataError::unavailable(dataset.name, "retries exhausted")))
    }
}

/// What happened to one dataset.
#[derive(Debug)]
pub enum DownloadOutcome {
    Downloaded { path: PathBuf, bytes: usize },
    AlreadyPresent { path: PathBuf },
    Failed(DataError),
}

/// Outcome of a batch download.
#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub outcomes: Vec<(&'static str, DownloadOutcome)>,
}

impl DownloadSummary {
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, DownloadOutcome::Failed(_)))
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

/// Download every dataset missing from `dir` (or all of them with `force`).
///
/// One failure does not stop the batch; check [`DownloadSummary::all_succeeded`].
pub fn download_datasets(
    fetcher: &dyn Fetcher,
    datasets: &[DatasetSpec],
    dir: &Path,
    force: bool,
) -> DownloadSummary {
    let mut summary = DownloadSummary::default();
    for dataset in datasets {
        let path = dir.join(dataset.file_name);
        let outcome = if path.exists() && !force {
            tracing::info!(dataset = dataset.name, path = %path.display(), "already present, skipping");
            DownloadOutcome::AlreadyPresent { path }
        } else {
            tracing::info!(dataset = dataset.name, url = dataset.url, "downloading");
            match fetcher
                .fetch(dataset)
                .and_then(|body| write_atomic_bytes(&path, &body).map(|()| body.len()))
            {
                Ok(bytes) => DownloadOutcome::Downloaded { path, bytes },
                Err(e) => {
                    tracing::warn!(dataset = dataset.name, error = %e, "download failed");
                    DownloadOutcome::Failed(e)
                }
            }
        };
        summary.outcomes.push((dataset.name, outcome));
    }
    summary
}
