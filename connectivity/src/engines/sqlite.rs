use std::str::FromStr;

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use common::models::DatabaseFamily;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use super::{connect_error, native_url, query_error, Credentials, DatabaseDriver, RowSet, Session};
use crate::value::NativeValue;

/// Embedded engine. Credentials are ignored.
pub struct SqliteDriver {
    name: String,
}

impl SqliteDriver {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> DatabaseFamily {
        DatabaseFamily::SQLite
    }

    async fn open(&self, url: &str, _credentials: &Credentials) -> AppResult<Box<dyn Session>> {
        let options = SqliteConnectOptions::from_str(native_url(url))
            .map_err(|e| AppError::SessionBuildFailed(e.to_string()))?;
        let conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(connect_error)?;
        tracing::debug!(driver = %self.name, "SQLite session opened");
        Ok(Box::new(SqliteSession {
            conn: Mutex::new(Some(conn)),
        }))
    }
}

struct SqliteSession {
    conn: Mutex<Option<SqliteConnection>>,
}

#[async_trait]
impl Session for SqliteSession {
    async fn query(&self, sql: &str) -> AppResult<RowSet> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(AppError::NoActiveSession)?;

        let statement = (&mut *conn).prepare(sql).await.map_err(query_error)?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = statement
            .query()
            .fetch_all(&mut *conn)
            .await
            .map_err(query_error)?;

        Ok(RowSet {
            columns,
            rows: rows.iter().map(decode_row).collect(),
        })
    }

    async fn ping(&self) -> AppResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(AppError::NoActiveSession)?;
        conn.ping()
            .await
            .map_err(|e| AppError::ConnectionInvalid(e.to_string()))
    }

    async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "SQLite session did not close cleanly");
            }
        }
    }
}

fn decode_row(row: &SqliteRow) -> Vec<NativeValue> {
    (0..row.len()).map(|idx| decode_cell(row, idx)).collect()
}

/// SQLite is dynamically typed: the storage class of each value decides the
/// variant, with the declared column type only used to recover booleans.
fn decode_cell(row: &SqliteRow, idx: usize) -> NativeValue {
    let storage = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return NativeValue::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(e) => {
            tracing::debug!(column = idx, error = %e, "SQLite cell unreadable");
            return NativeValue::Null;
        }
    };
    let declared = row.column(idx).type_info().name().to_uppercase();

    let decoded = match storage.as_str() {
        "INTEGER" if declared == "BOOLEAN" => row.try_get_unchecked::<bool, _>(idx).map(NativeValue::Bool),
        "INTEGER" => row.try_get_unchecked::<i64, _>(idx).map(NativeValue::Int),
        "REAL" => row.try_get_unchecked::<f64, _>(idx).map(NativeValue::Float),
        "BLOB" => row.try_get_unchecked::<Vec<u8>, _>(idx).map(NativeValue::Bytes),
        _ => row.try_get_unchecked::<String, _>(idx).map(NativeValue::Text),
    };
    decoded.unwrap_or_else(|e| NativeValue::Other {
        type_name: storage,
        text: e.to_string(),
    })
}
