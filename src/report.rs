use crate::error::Result;
use crate::schema::{DecisionSnapshot, ExecutionCounters, ExecutionResult};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::io::Write;

pub const CSV_HEADER: [&str; 6] = [
    "row_number",
    "account_number",
    "action",
    "result",
    "message",
    "client_id",
];

/// Writes execution results as a semicolon-delimited CSV.
pub fn write_results_csv<W: Write>(results: &[ExecutionResult], writer: W) -> Result<()> {
    let mut csv = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);
    csv.write_record(CSV_HEADER)?;

    for result in results {
        csv.write_record([
            result.row_number.to_string().as_str(),
            result.account_number.as_str(),
            result.action.as_str(),
            result.result.as_str(),
            result.message.as_deref().unwrap_or(""),
            result.client_id.as_deref().unwrap_or(""),
        ])?;
    }

    csv.flush()?;
    Ok(())
}

pub fn results_csv_string(results: &[ExecutionResult]) -> Result<String> {
    let mut buffer = Vec::new();
    write_results_csv(results, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Debug dump of one run: what was decided and what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub generated_at: DateTime<Utc>,
    pub file_name: String,
    pub counters: ExecutionCounters,
    pub results: Vec<ExecutionResult>,
    pub decisions: Vec<DecisionSnapshot>,
}

impl ImportReport {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ImportReport)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
