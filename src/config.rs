//! Run configuration
//!
//! Mirrors the `parameters` object of the connector configuration file.
//! Either the bare object or a document wrapping it under `parameters` is
//! accepted.
//!
//! An optional input table (CSV with `PK,report,start_date,end_date,segment_data_by`)
//! turns one run into several passes, one per row.

use crate::error::{MeltError, Result};
use crate::melt::pnl::PNL_QUERY;
use chrono::{Datelike, Months, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use std::io::Read;
use std::path::Path;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

const INCREMENTAL_LOAD: &str = "incremental_load";
const REPORT_MARKER: &str = "**";

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    #[serde(rename = "companyid")]
    pub company_id: String,

    /// Entity endpoints; a `**` suffix marks a report
    pub endpoints: Vec<String>,

    #[serde(default)]
    pub reports: Vec<String>,

    #[serde(default)]
    pub date_settings: Option<DateSettings>,

    pub destination: Destination,

    #[serde(default)]
    pub summarize_column_by: Option<String>,

    /// Query text for the `CustomQuery` report
    #[serde(default)]
    pub custom_query: Option<String>,

    #[serde(default)]
    pub sandbox: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateSettings {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Destination {
    #[serde(default)]
    pub load_type: Option<String>,
}

/// What to extract for one configured endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSpec {
    Entity(String),
    Report(String),
    ProfitAndLossQuery,
}

impl EndpointSpec {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == PNL_QUERY {
            return EndpointSpec::ProfitAndLossQuery;
        }
        match raw.strip_suffix(REPORT_MARKER) {
            Some(report) => EndpointSpec::Report(report.to_string()),
            None => EndpointSpec::Entity(raw.to_string()),
        }
    }

    fn report(raw: &str) -> Self {
        match EndpointSpec::parse(raw) {
            EndpointSpec::Entity(name) => EndpointSpec::Report(name),
            other => other,
        }
    }
}

/// Optional reporting period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Both bounds, required by every report except `CustomQuery`
    pub fn require(&self, report: &str) -> Result<(NaiveDate, NaiveDate)> {
        let (Some(start), Some(end)) = (self.start, self.end) else {
            return Err(MeltError::config(format!(
                "Start date and End date are required for {} reports.",
                report
            )));
        };
        if start > end {
            return Err(MeltError::config(format!(
                "Please validate your date parameter for {}: {} is after {}",
                report, start, end
            )));
        }
        Ok((start, end))
    }
}

/// One row of the input table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InputRow {
    /// Company the row belongs to; must match `companyid`
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(default)]
    pub report: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub segment_data_by: String,
}

/// Per-row run parameters loaded from a CSV input table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputTable {
    pub rows: Vec<InputRow>,
}

impl InputTable {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let rows = csv::Reader::from_reader(reader)
            .deserialize()
            .collect::<std::result::Result<Vec<InputRow>, _>>()?;
        Ok(InputTable { rows })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every row must target the configured company
    pub fn validate(&self, company_id: &str) -> Result<()> {
        match self.rows.iter().find(|row| row.pk != company_id) {
            Some(row) => Err(MeltError::config(format!(
                "company_id from params: {} does not match with company_id provided \
                 in input table: {}.",
                company_id, row.pk
            ))),
            None => Ok(()),
        }
    }

    /// Rows force incremental manifests; an empty table keeps the configured load type
    pub fn forces_incremental(&self) -> bool {
        !self.is_empty()
    }
}

/// Everything one run extracts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub endpoints: Vec<EndpointSpec>,
    pub dates: DateRange,
    pub summarize_column_by: Option<String>,
    pub custom_query: Option<String>,
}

impl ExtractorConfig {
    pub fn from_json(document: &Value) -> Result<Self> {
        let parameters = document.get("parameters").unwrap_or(document);
        let config: ExtractorConfig = serde_json::from_value(parameters.clone())
            .map_err(|e| MeltError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let document: Value = serde_json::from_reader(std::io::BufReader::new(file))?;
        Self::from_json(&document)
    }

    pub fn validate(&self) -> Result<()> {
        if self.company_id.is_empty()
            || self.company_id.contains(char::is_whitespace)
            || self.company_id.contains('.')
        {
            return Err(MeltError::config(
                "The company_id parameter should not contain any spaces or dots.",
            ));
        }
        Ok(())
    }

    pub fn incremental(&self) -> bool {
        self.destination.load_type.as_deref() == Some(INCREMENTAL_LOAD)
    }

    /// Configured endpoints followed by configured reports
    pub fn endpoint_specs(&self) -> Vec<EndpointSpec> {
        self.endpoints
            .iter()
            .map(|e| EndpointSpec::parse(e))
            .chain(self.reports.iter().map(|r| EndpointSpec::report(r)))
            .collect()
    }

    pub fn date_range(&self, today: NaiveDate) -> Result<DateRange> {
        let settings = self.date_settings.clone().unwrap_or_default();
        Ok(DateRange {
            start: resolve_optional(settings.start_date.as_deref(), today)?,
            end: resolve_optional(settings.end_date.as_deref(), today)?,
        })
    }

    pub fn run_plan(&self, today: NaiveDate) -> Result<RunPlan> {
        Ok(RunPlan {
            endpoints: self.endpoint_specs(),
            dates: self.date_range(today)?,
            summarize_column_by: self.summarize_column_by.clone().filter(|s| !s.is_empty()),
            custom_query: self.custom_query.clone().filter(|s| !s.is_empty()),
        })
    }

    /// Plans for an input-table run.
    ///
    /// Each row extracts the configured `endpoints` plus its own report over
    /// its own dates. An empty table extracts only the configured `endpoints`,
    /// without dates.
    pub fn input_table_plans(
        &self,
        table: &InputTable,
        today: NaiveDate,
    ) -> Result<Vec<RunPlan>> {
        table.validate(&self.company_id)?;
        let endpoints: Vec<EndpointSpec> =
            self.endpoints.iter().map(|e| EndpointSpec::parse(e)).collect();

        if table.is_empty() {
            log::info!("No rows in input table, processing selected endpoints only");
            return Ok(vec![RunPlan {
                endpoints,
                dates: DateRange::default(),
                summarize_column_by: None,
                custom_query: self.custom_query.clone().filter(|s| !s.is_empty()),
            }]);
        }

        table
            .rows
            .iter()
            .map(|row| -> Result<RunPlan> {
                let mut row_endpoints = endpoints.clone();
                if !row.report.trim().is_empty() {
                    row_endpoints.push(EndpointSpec::report(&row.report));
                }
                Ok(RunPlan {
                    endpoints: row_endpoints,
                    dates: DateRange {
                        start: resolve_optional(Some(row.start_date.as_str()), today)?,
                        end: resolve_optional(Some(row.end_date.as_str()), today)?,
                    },
                    summarize_column_by: Some(row.segment_data_by.trim().to_string())
                        .filter(|s| !s.is_empty()),
                    custom_query: self.custom_query.clone().filter(|s| !s.is_empty()),
                })
            })
            .collect()
    }
}

fn resolve_optional(raw: Option<&str>, today: NaiveDate) -> Result<Option<NaiveDate>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => resolve_date(raw, today).map(Some),
    }
}

/// Resolve `YYYY-MM-DD`, `PrevMonthStart` or `PrevMonthEnd` against `today`
pub fn resolve_date(raw: &str, today: NaiveDate) -> Result<NaiveDate> {
    let first_of_month = today.with_day(1);
    let resolved = match raw {
        "PrevMonthStart" => first_of_month.and_then(|d| d.checked_sub_months(Months::new(1))),
        "PrevMonthEnd" => first_of_month.and_then(|d| d.pred_opt()),
        _ => NaiveDate::parse_from_str(raw, DATE_FORMAT).ok(),
    };

    resolved.ok_or_else(|| {
        MeltError::config(format!(
            "Date {} is invalid. Valid types are: PrevMonthStart, PrevMonthEnd or YYYY-MM-DD",
            raw
        ))
    })
}
