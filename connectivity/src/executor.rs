//! SQL execution against the active session.

use std::sync::Arc;
use std::time::Instant;

use common::errors::{AppError, AppResult};
use common::models::ResultTable;
use serde_json::{Map, Value};

use crate::convert::ConverterRegistry;
use crate::engines::RowSet;
use crate::session::ConnectionManager;

pub struct QueryExecutor {
    connections: Arc<ConnectionManager>,
    converters: Arc<ConverterRegistry>,
}

impl QueryExecutor {
    pub fn new(connections: Arc<ConnectionManager>, converters: Arc<ConverterRegistry>) -> Self {
        Self {
            connections,
            converters,
        }
    }

    /// Runs `sql` on whatever session is active when the call starts.
    ///
    /// Never fails: errors are reported in the returned table together with
    /// the time spent before the failure. The reported time includes row
    /// conversion.
    pub async fn execute(&self, sql: &str) -> ResultTable {
        let started = Instant::now();
        let outcome = self.run(sql).await.map(|set| {
            let rows = self.to_rows(&set);
            (set.columns, rows)
        });
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((columns, rows)) => {
                tracing::debug!(rows = rows.len(), elapsed_ms, "Query executed");
                ResultTable::success(columns, rows, elapsed_ms)
            }
            Err(e) => {
                tracing::warn!(error = %e, category = e.category(), elapsed_ms, "Query failed");
                ResultTable::failure(e.message_or_category(), elapsed_ms)
            }
        }
    }

    async fn run(&self, sql: &str) -> AppResult<RowSet> {
        let active = self
            .connections
            .active()
            .await
            .ok_or(AppError::NoActiveSession)?;
        active.session.query(sql).await
    }

    fn to_rows(&self, set: &RowSet) -> Vec<Map<String, Value>> {
        set.rows
            .iter()
            .map(|row| {
                set.columns
                    .iter()
                    .zip(row)
                    .map(|(column, cell)| (column.clone(), self.converters.convert(cell)))
                    .collect()
            })
            .collect()
    }
}
