//! SQL execution models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Request body for executing SQL against the active connection.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ExecuteRequest {
    #[validate(length(min = 1, message = "SQL statement is required"))]
    pub sql: String,
}

/// Result of one `execute` call.
///
/// Failures are encoded here (`success = false`, `error` set) rather than
/// returned as errors, so the elapsed time is always reported.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResultTable {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    /// Rows in result-set order, each keyed by column name in column order.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub rows: Option<Vec<serde_json::Map<String, serde_json::Value>>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub success: bool,

    pub execution_time_ms: u64,
}

impl ResultTable {
    pub fn success(
        columns: Vec<String>,
        rows: Vec<serde_json::Map<String, serde_json::Value>>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            columns: Some(columns),
            rows: Some(rows),
            error: None,
            success: true,
            execution_time_ms,
        }
    }

    pub fn failure(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            columns: None,
            rows: None,
            error: Some(error.into()),
            success: false,
            execution_time_ms,
        }
    }
}
