//! Configurable column schemas for each input source.
//!
//! Upstream providers rename columns between releases, so nothing here is
//! hard-coded at the call site. Defaults match the public datasets:
//! Our World in Data (cases, vaccinations, population), Oxford OxCGRT
//! (policy) and Johns Hopkins CSSE (wide time series).

use csv::StringRecord;
use serde::{Deserialize, Serialize};

use super::source::DataError;

/// Keep only rows whose `column` equals `equals`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub equals: String,
}

/// Long layout for cumulative cases and deaths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseSchema {
    pub country_column: String,
    pub date_column: String,
    pub date_format: String,
    pub confirmed_column: String,
    pub deaths_column: String,
    pub recovered_column: Option<String>,
    pub filter: Option<RowFilter>,
}

impl Default for CaseSchema {
    fn default() -> Self {
        Self {
            country_column: "location".into(),
            date_column: "date".into(),
            date_format: "%Y-%m-%d".into(),
            confirmed_column: "total_cases".into(),
            deaths_column: "total_deaths".into(),
            recovered_column: None,
            filter: None,
        }
    }
}

/// Long layout for vaccinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaccinationSchema {
    pub country_column: String,
    pub date_column: String,
    pub date_format: String,
    pub doses_column: String,
    pub fully_vaccinated_column: Option<String>,
    pub filter: Option<RowFilter>,
}

impl Default for VaccinationSchema {
    fn default() -> Self {
        Self {
            country_column: "location".into(),
            date_column: "date".into(),
            date_format: "%Y-%m-%d".into(),
            doses_column: "total_vaccinations".into(),
            fully_vaccinated_column: Some("people_fully_vaccinated_per_hundred".into()),
            filter: None,
        }
    }
}

/// Long layout for the stringency index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySchema {
    pub country_column: String,
    pub date_column: String,
    pub date_format: String,
    pub stringency_column: String,
    pub filter: Option<RowFilter>,
}

impl Default for PolicySchema {
    fn default() -> Self {
        Self {
            country_column: "CountryName".into(),
            date_column: "Date".into(),
            date_format: "%Y%m%d".into(),
            stringency_column: "StringencyIndex".into(),
            filter: Some(RowFilter {
                column: "Jurisdiction".into(),
                equals: "NAT_TOTAL".into(),
            }),
        }
    }
}

/// Population reference. With a date column the most recent value wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationSchema {
    pub country_column: String,
    pub population_column: String,
    pub date_column: Option<String>,
    pub date_format: String,
}

impl Default for PopulationSchema {
    fn default() -> Self {
        Self {
            country_column: "location".into(),
            population_column: "population".into(),
            date_column: Some("date".into()),
            date_format: "%Y-%m-%d".into(),
        }
    }
}

/// Johns Hopkins wide layout: identifier columns, then one column per date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WideSchema {
    pub country_column: String,
    /// Every non-date column, including the country column.
    pub id_columns: Vec<String>,
    pub date_format: String,
}

impl Default for WideSchema {
    fn default() -> Self {
        Self {
            country_column: "Country/Region".into(),
            id_columns: vec![
                "Province/State".into(),
                "Country/Region".into(),
                "Lat".into(),
                "Long".into(),
            ],
            date_format: "%m/%d/%y".into(),
        }
    }
}

/// Index of a required column.
pub(crate) fn require_column(
    headers: &StringRecord,
    name: &str,
    source_name: &str,
) -> Result<usize, DataError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| DataError::data_format(source_name, format!("missing required column '{name}'")))
}

/// Index of an optional column; configured but absent is still an error.
pub(crate) fn optional_column(
    headers: &StringRecord,
    name: Option<&str>,
    source_name: &str,
) -> Result<Option<usize>, DataError> {
    name.map(|n| require_column(headers, n, source_name)).transpose()
}

/// A row filter resolved against the header.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedFilter {
    index: usize,
    equals: String,
}

impl ResolvedFilter {
    pub(crate) fn resolve(
        headers: &StringRecord,
        filter: Option<&RowFilter>,
        source_name: &str,
    ) -> Result<Option<Self>, DataError> {
        filter
            .map(|f| {
                Ok(Self {
                    index: require_column(headers, &f.column, source_name)?,
                    equals: f.equals.clone(),
                })
            })
            .transpose()
    }

    pub(crate) fn accepts(&self, record: &StringRecord) -> bool {
        record.get(self.index) == Some(self.equals.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_column_reports_missing_name() {
        let headers = StringRecord::from(vec!["location", "date"]);
        assert_eq!(require_column(&headers, "date", "cases").unwrap(), 1);
        let err = require_column(&headers, "total_cases", "cases").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cases: data format error: missing required column 'total_cases'"
        );
    }

    #[test]
    fn filter_matches_exact_value() {
        let headers = StringRecord::from(vec!["CountryName", "Jurisdiction"]);
        let filter = ResolvedFilter::resolve(
            &headers,
            PolicySchema::default().filter.as_ref(),
            "policy",
        )
        .unwrap()
        .unwrap();
        assert!(filter.accepts(&StringRecord::from(vec!["Chile", "NAT_TOTAL"])));
        assert!(!filter.accepts(&StringRecord::from(vec!["Chile", "STATE_TOTAL"])));
    }

    #[test]
    fn schemas_deserialize_with_partial_overrides() {
        let schema: PolicySchema = toml::from_str(r#"stringency_column = "StringencyIndex_Average""#)
            .unwrap();
        assert_eq!(schema.stringency_column, "StringencyIndex_Average");
        assert_eq!(schema.date_format, "%Y%m%d");
    }
}
