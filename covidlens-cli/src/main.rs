//! covidlens CLI: run, download and inspect commands.
//!
//! Commands:
//! - `run`: load the sources, merge, compute metrics, write CSV + manifest + summary
//! - `download`: fetch the public datasets into a data directory
//! - `inspect`: re-load an exported merged file and print its shape

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use covidlens_core::data::{download_datasets, DataError, DownloadOutcome, HttpFetcher, DEFAULT_DATASETS};
use covidlens_core::export::read_merged;
use covidlens_runner::{run_pipeline, ConfigOverrides, PipelineConfig, RunError, RunReport};

#[derive(Parser)]
#[command(
    name = "covidlens",
    version,
    about = "Merge COVID-19 case, vaccination and policy data into one analyzable table"
)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline.
    Run(RunArgs),
    /// Download the public datasets.
    Download {
        /// Target directory.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Re-download files that already exist.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Re-load an exported merged file and print row and country counts.
    Inspect {
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Long cases file, or the JHU confirmed file together with --deaths.
    #[arg(long)]
    cases: Option<PathBuf>,

    /// JHU deaths file.
    #[arg(long)]
    deaths: Option<PathBuf>,

    /// JHU recovered file.
    #[arg(long)]
    recovered: Option<PathBuf>,

    #[arg(long)]
    vaccinations: Option<PathBuf>,

    #[arg(long)]
    policy: Option<PathBuf>,

    #[arg(long)]
    population: Option<PathBuf>,

    /// Merged CSV destination.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Markdown summary destination.
    #[arg(long)]
    summary: Option<PathBuf>,

    #[arg(long)]
    lag_days: Option<u32>,

    #[arg(long)]
    min_observations: Option<usize>,

    /// Tolerated share of unparseable rows per source.
    #[arg(long)]
    max_skip_fraction: Option<f64>,

    /// Load the sources one after another instead of in parallel.
    #[arg(long, default_value_t = false)]
    sequential: bool,
}

impl RunArgs {
    fn into_parts(self) -> (Option<PathBuf>, ConfigOverrides) {
        let overrides = ConfigOverrides {
            cases: self.cases,
            deaths: self.deaths,
            recovered: self.recovered,
            vaccinations: self.vaccinations,
            policy: self.policy,
            population: self.population,
            merged: self.output,
            summary: self.summary,
            lag_days: self.lag_days,
            min_observations: self.min_observations,
            max_skip_fraction: self.max_skip_fraction,
            sequential: self.sequential,
        };
        (self.config, overrides)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run(args) => run_cmd(args),
        Commands::Download { data_dir, force } => download_cmd(&data_dir, force),
        Commands::Inspect { file } => inspect_cmd(&file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

/// 2 = data format, 3 = source unavailable, 4 = write, 1 = anything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<RunError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<DataError>() {
        return e.exit_code();
    }
    1
}

fn run_cmd(args: RunArgs) -> Result<()> {
    let (config_path, overrides) = args.into_parts();
    let mut config = match &config_path {
        Some(path) => PipelineConfig::from_file(path).map_err(RunError::from)?,
        None => PipelineConfig::default(),
    };
    overrides.apply(&mut config).map_err(RunError::from)?;
    tracing::debug!(?config, "effective configuration");

    let report = run_pipeline(&config)?;
    print_run(&report);
    Ok(())
}

fn print_run(report: &RunReport) {
    let output = &report.manifest.output;
    println!();
    println!("=== covidlens run ===");
    println!("Records:    {}", output.records);
    println!("Countries:  {}", output.countries);
    if let (Some(first), Some(last)) = (output.first_date, output.last_date) {
        println!("Dates:      {first} to {last}");
    }
    println!("Warnings:   {}", report.manifest.total_warnings());
    for (kind, count) in &report.manifest.warnings {
        println!("  {:<28} {count}", kind.label());
    }
    println!("Merged:     {}", report.merged_path.display());
    if let Some(path) = &report.manifest_path {
        println!("Manifest:   {}", path.display());
    }
    println!("Summary:    {}", report.summary_path.display());
    println!("Elapsed:    {} ms", report.elapsed_ms);
    println!();
}

fn download_cmd(data_dir: &Path, force: bool) -> Result<()> {
    let fetcher = HttpFetcher::new(HttpFetcher::DEFAULT_TIMEOUT)?;
    tracing::info!(dir = %data_dir.display(), force, datasets = DEFAULT_DATASETS.len(), "fetching datasets");
    let summary = download_datasets(&fetcher, &DEFAULT_DATASETS, data_dir, force);

    for (name, outcome) in &summary.outcomes {
        match outcome {
            DownloadOutcome::Downloaded { path, bytes } => {
                println!("{name:<20} downloaded {bytes} bytes to {}", path.display())
            }
            DownloadOutcome::AlreadyPresent { path } => {
                println!("{name:<20} already present at {}", path.display())
            }
            DownloadOutcome::Failed(e) => eprintln!("{name:<20} failed: {e}"),
        }
    }

    if !summary.all_succeeded() {
        return Err(DataError::unavailable(
            "download",
            format!("{} of {} datasets failed", summary.failed(), summary.outcomes.len()),
        )
        .into());
    }
    Ok(())
}

fn inspect_cmd(file: &Path) -> Result<()> {
    let table = read_merged(file).with_context(|| format!("inspecting {}", file.display()))?;
    let dates = table.records().iter().map(|r| r.date);
    println!("File:       {}", file.display());
    println!("Records:    {}", table.len());
    println!("Countries:  {}", table.country_count());
    if let (Some(first), Some(last)) = (dates.clone().min(), dates.max()) {
        println!("Dates:      {first} to {last}");
    }
    Ok(())
}
