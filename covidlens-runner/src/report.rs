//! Markdown run summary and the chart-ready selections behind it.

use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt::Write as _;

use covidlens_core::metrics::{CorrelationMatrix, CountrySummary};

use crate::config::PipelineConfig;
use crate::manifest::RunManifest;
use crate::pipeline::Analysis;

/// Missing countries listed before the list is cut short.
const MAX_LISTED: usize = 20;

/// One row of the deaths-vs-vaccination snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactRow {
    pub country: String,
    pub population: u64,
    pub deaths_per_100k: f64,
    pub deaths_date: NaiveDate,
    pub fully_vaccinated_per_hundred: Option<f64>,
}

/// Countries with the highest latest confirmed count, largest first.
pub fn top_by_confirmed(summaries: &[CountrySummary], n: usize) -> Vec<&CountrySummary> {
    let mut ranked: Vec<&CountrySummary> = summaries.iter().filter(|s| s.latest_confirmed.is_some()).collect();
    ranked.sort_by(|a, b| {
        let (va, vb) = (a.latest_confirmed.map(|d| d.value), b.latest_confirmed.map(|d| d.value));
        vb.cmp(&va).then_with(|| a.country.cmp(&b.country))
    });
    ranked.truncate(n);
    ranked
}

/// Latest deaths per 100k against vaccination coverage for countries with
/// population strictly above `min_population`, highest death rate first.
pub fn deaths_vs_vaccination(summaries: &[CountrySummary], min_population: u64, n: usize) -> Vec<ImpactRow> {
    let mut rows: Vec<ImpactRow> = summaries
        .iter()
        .filter_map(|s| {
            let population = s.population.filter(|&p| p > min_population)?;
            let deaths = s.latest_deaths_per_100k?;
            Some(ImpactRow {
                country: s.country.clone(),
                population,
                deaths_per_100k: deaths.value,
                deaths_date: deaths.date,
                fully_vaccinated_per_hundred: s.latest_fully_vaccinated_per_hundred.map(|d| d.value),
            })
        })
        .collect();
    rows.sort_by(|a, b| {
        b.deaths_per_100k
            .partial_cmp(&a.deaths_per_100k)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.country.cmp(&b.country))
    });
    rows.truncate(n);
    rows
}

fn num(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{v:.precision$}"),
        None => "n/a".to_string(),
    }
}

fn int(value: Option<u64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

/// Render the Markdown summary of a run.
pub fn render_summary(config: &PipelineConfig, analysis: &Analysis, manifest: &RunManifest) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_summary(&mut out, config, analysis, manifest);
    out
}

fn write_summary(
    out: &mut String,
    config: &PipelineConfig,
    analysis: &Analysis,
    manifest: &RunManifest,
) -> std::fmt::Result {
    let a = &config.analysis;
    let output = &manifest.output;

    writeln!(out, "# COVID-19 merged dataset summary\n")?;
    writeln!(out, "## Run\n")?;
    writeln!(out, "- Records: {} across {} countries", output.records, output.countries)?;
    if let (Some(first), Some(last)) = (output.first_date, output.last_date) {
        writeln!(out, "- Dates: {first} to {last}")?;
    }
    writeln!(out, "- Output: `{}` (blake3 `{}`)", output.path, output.blake3)?;
    writeln!(out, "- Configuration hash: `{}`", manifest.config_hash)?;
    writeln!(
        out,
        "- Analysis: lag {} days, at least {} paired observations, {}-day rolling window, vaccination rate bound {}",
        a.lag_days, a.min_observations, a.rolling_window, a.vaccination_upper_bound
    )?;

    if !manifest.inputs.is_empty() {
        writeln!(out, "\n### Inputs\n")?;
        writeln!(out, "| File | Sources | BLAKE3 |")?;
        writeln!(out, "|------|---------|--------|")?;
        for input in &manifest.inputs {
            writeln!(out, "| `{}` | {} | `{}` |", input.path, input.roles.join(", "), input.blake3)?;
        }
    }

    writeln!(out, "\n### Loading\n")?;
    writeln!(out, "| Source | Read | Loaded | Skipped | Filtered | Duplicates |")?;
    writeln!(out, "|--------|------|--------|---------|----------|------------|")?;
    for (kind, s) in &analysis.load_stats {
        writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            kind, s.rows_read, s.rows_loaded, s.rows_skipped, s.rows_filtered, s.duplicates
        )?;
    }

    writeln!(out, "\n## Warnings\n")?;
    if manifest.warnings.is_empty() {
        writeln!(out, "No warnings.")?;
    } else {
        writeln!(out, "| Kind | Count |")?;
        writeln!(out, "|------|-------|")?;
        for (kind, count) in &manifest.warnings {
            writeln!(out, "| {} | {} |", kind.label(), count)?;
        }
    }
    if !analysis.missing_population.is_empty() {
        let listed: Vec<&str> = analysis
            .missing_population
            .iter()
            .take(MAX_LISTED)
            .map(String::as_str)
            .collect();
        write!(out, "\nNo population for: {}", listed.join(", "))?;
        let rest = analysis.missing_population.len().saturating_sub(MAX_LISTED);
        if rest > 0 {
            write!(out, " and {rest} more")?;
        }
        writeln!(out, ".")?;
    }

    let top = top_by_confirmed(&analysis.summaries, config.output.top_countries);
    writeln!(out, "\n## Top {} countries by confirmed cases\n", top.len())?;
    writeln!(
        out,
        "| Country | Date | Confirmed | Deaths | Cases per 100k | Deaths per 100k | Peak {}-day new cases |",
        a.rolling_window
    )?;
    writeln!(out, "|---------|------|-----------|--------|----------------|-----------------|------------------|")?;
    for s in top {
        let peak = s
            .peak_new_cases_avg
            .map_or_else(|| "n/a".to_string(), |p| format!("{:.1} ({})", p.value, p.date));
        let date = s.latest_confirmed.map_or_else(String::new, |d| d.date.to_string());
        writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} |",
            s.country,
            date,
            int(s.latest_confirmed.map(|d| d.value)),
            int(s.latest_deaths.map(|d| d.value)),
            num(s.latest_cases_per_100k.map(|d| d.value), 1),
            num(s.latest_deaths_per_100k.map(|d| d.value), 1),
            peak,
        )?;
    }

    let impact = deaths_vs_vaccination(&analysis.summaries, config.output.min_population, config.output.top_impacted);
    writeln!(
        out,
        "\n## Deaths vs vaccination (population above {})\n",
        config.output.min_population
    )?;
    if impact.is_empty() {
        writeln!(out, "No country qualifies.")?;
    } else {
        writeln!(out, "| Country | Population | Deaths per 100k | As of | Fully vaccinated per hundred |")?;
        writeln!(out, "|---------|------------|-----------------|-------|------------------------------|")?;
        for row in &impact {
            writeln!(
                out,
                "| {} | {} | {:.1} | {} | {} |",
                row.country,
                row.population,
                row.deaths_per_100k,
                row.deaths_date,
                num(row.fully_vaccinated_per_hundred, 1)
            )?;
        }
    }

    writeln!(
        out,
        "\n## Stringency vs new cases per 100k (lag {} days)\n",
        a.lag_days
    )?;
    writeln!(out, "| Country | Pairs | r | Best lag | r at best lag | Mean stringency |")?;
    writeln!(out, "|---------|-------|---|----------|---------------|-----------------|")?;
    for s in &analysis.summaries {
        let lc = &s.lag_correlation;
        let (best_lag, best_r) = match &s.best_lag {
            Some(b) => (format!("{} d", b.lag_days), num(b.coefficient, 3)),
            None => ("n/a".to_string(), "n/a".to_string()),
        };
        writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            s.country,
            lc.observations,
            num(lc.coefficient, 3),
            best_lag,
            best_r,
            num(s.mean_stringency, 1)
        )?;
    }

    write_matrix(out, &analysis.correlations)
}

fn write_matrix(out: &mut String, matrix: &CorrelationMatrix) -> std::fmt::Result {
    writeln!(out, "\n## Correlation matrix\n")?;
    writeln!(out, "Complete rows: {}\n", matrix.observations)?;
    let names: Vec<&str> = matrix.variables.iter().map(|v| v.name()).collect();
    writeln!(out, "| | {} |", names.join(" | "))?;
    writeln!(out, "|---|{}", "---|".repeat(names.len()))?;
    for (name, row) in names.iter().zip(&matrix.cells) {
        let cells: Vec<String> = row.iter().map(|c| num(*c, 2)).collect();
        writeln!(out, "| {} | {} |", name, cells.join(" | "))?;
    }
    Ok(())
}
