//! Pearson correlation: per-country lag correlation and the cross-variable matrix.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::{CountrySeries, MergedRecord, MergedTable};

/// Pearson correlation of `(x, y)` pairs.
///
/// `None` with fewer than two pairs or when either side has zero variance.
pub fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    let n = pairs.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / nf;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / nf;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for &(x, y) in pairs {
        let (dx, dy) = (x - mean_x, y - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some((sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0))
}

/// `(stringency(t - lag), new_cases_per_100k(t))` for every `t` where both exist.
pub fn lagged_pairs(series: CountrySeries<'_>, lag_days: u32) -> Vec<(f64, f64)> {
    let lag = Duration::days(i64::from(lag_days));
    series
        .records()
        .iter()
        .filter_map(|r| {
            let y = r.derived.new_cases_per_100k?;
            let x = series.get(r.date.checked_sub_signed(lag)?)?.stringency_index?;
            Some((x, y))
        })
        .collect()
}

/// Correlation at one lag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LagCorrelation {
    pub lag_days: u32,
    /// Complete pairs found.
    pub observations: usize,
    /// `None` below the observation minimum or on zero variance.
    pub coefficient: Option<f64>,
}

impl LagCorrelation {
    pub fn is_defined(&self) -> bool {
        self.coefficient.is_some()
    }
}

pub fn lag_correlation(series: CountrySeries<'_>, lag_days: u32, min_observations: usize) -> LagCorrelation {
    let pairs = lagged_pairs(series, lag_days);
    let coefficient = if pairs.len() >= min_observations {
        pearson(&pairs)
    } else {
        None
    };
    LagCorrelation {
        lag_days,
        observations: pairs.len(),
        coefficient,
    }
}

/// The lag in `0..=max_lag` with the strongest defined correlation.
///
/// Strength is the absolute coefficient; on a tie the smaller lag wins.
pub fn scan_lags(series: CountrySeries<'_>, max_lag: u32, min_observations: usize) -> Option<LagCorrelation> {
    let mut best: Option<LagCorrelation> = None;
    for lag in 0..=max_lag {
        let candidate = lag_correlation(series, lag, min_observations);
        let Some(c) = candidate.coefficient else {
            continue;
        };
        let stronger = best
            .and_then(|b| b.coefficient)
            .map_or(true, |b| c.abs() > b.abs());
        if stronger {
            best = Some(candidate);
        }
    }
    best
}

/// Columns of the correlation matrix, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixVariable {
    CasesPer100k,
    DeathsPer100k,
    RecoveredPer100k,
    NewCasesPer100k,
    NewDeathsPer100k,
    PeopleFullyVaccinatedPerHundred,
    StringencyIndex,
    Population,
}

impl MatrixVariable {
    pub const ALL: [MatrixVariable; 8] = [
        MatrixVariable::CasesPer100k,
        MatrixVariable::DeathsPer100k,
        MatrixVariable::RecoveredPer100k,
        MatrixVariable::NewCasesPer100k,
        MatrixVariable::NewDeathsPer100k,
        MatrixVariable::PeopleFullyVaccinatedPerHundred,
        MatrixVariable::StringencyIndex,
        MatrixVariable::Population,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MatrixVariable::CasesPer100k => "cases_per_100k",
            MatrixVariable::DeathsPer100k => "deaths_per_100k",
            MatrixVariable::RecoveredPer100k => "recovered_per_100k",
            MatrixVariable::NewCasesPer100k => "new_cases_per_100k",
            MatrixVariable::NewDeathsPer100k => "new_deaths_per_100k",
            MatrixVariable::PeopleFullyVaccinatedPerHundred => "people_fully_vaccinated_per_hundred",
            MatrixVariable::StringencyIndex => "stringency_index",
            MatrixVariable::Population => "population",
        }
    }

    pub fn value(&self, r: &MergedRecord) -> Option<f64> {
        match self {
            MatrixVariable::CasesPer100k => r.derived.cases_per_100k,
            MatrixVariable::DeathsPer100k => r.derived.deaths_per_100k,
            MatrixVariable::RecoveredPer100k => r.derived.recovered_per_100k,
            MatrixVariable::NewCasesPer100k => r.derived.new_cases_per_100k,
            MatrixVariable::NewDeathsPer100k => r.derived.new_deaths_per_100k,
            MatrixVariable::PeopleFullyVaccinatedPerHundred => r.people_fully_vaccinated_per_hundred,
            MatrixVariable::StringencyIndex => r.stringency_index,
            MatrixVariable::Population => r.population.map(|p| p as f64),
        }
    }
}

/// Pairwise Pearson matrix over the rows complete in every variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub variables: Vec<MatrixVariable>,
    /// Rows that survived listwise deletion.
    pub observations: usize,
    /// `cells[i][j]`; `None` when undefined.
    pub cells: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn compute(table: &MergedTable, variables: &[MatrixVariable], min_observations: usize) -> Self {
        let rows: Vec<Vec<f64>> = table
            .records()
            .iter()
            .filter_map(|r| variables.iter().map(|v| v.value(r)).collect::<Option<Vec<f64>>>())
            .collect();

        let k = variables.len();
        let mut cells = vec![vec![None; k]; k];
        if rows.len() >= min_observations {
            for i in 0..k {
                for j in i..k {
                    let pairs: Vec<(f64, f64)> = rows.iter().map(|row| (row[i], row[j])).collect();
                    let c = pearson(&pairs);
                    cells[i][j] = c;
                    cells[j][i] = c;
                }
            }
        }
        Self {
            variables: variables.to_vec(),
            observations: rows.len(),
            cells,
        }
    }

    pub fn get(&self, a: MatrixVariable, b: MatrixVariable) -> Option<f64> {
        let i = self.variables.iter().position(|v| *v == a)?;
        let j = self.variables.iter().position(|v| *v == b)?;
        self.cells[i][j]
    }
}
