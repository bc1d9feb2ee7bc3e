//! MySQL and MariaDB share one wire protocol and one engine.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use common::errors::{AppError, AppResult};
use common::models::DatabaseFamily;
use rust_decimal::Decimal;
use serde_json::value::RawValue;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::types::Json;
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo};
use tokio::sync::Mutex;

use super::{
    connect_error, decode_as, native_url, query_error, undecoded, Credentials, DatabaseDriver,
    RowSet, Session,
};
use crate::value::NativeValue;

pub struct MySqlDriver {
    name: String,
    family: DatabaseFamily,
}

impl MySqlDriver {
    pub fn new(name: &str, family: DatabaseFamily) -> Self {
        Self {
            name: name.to_string(),
            family,
        }
    }
}

/// `mariadb://` URLs are served by the MySQL engine.
fn mysql_url(url: &str) -> String {
    let url = native_url(url);
    match url.get(..10) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mariadb://") => format!("mysql://{}", &url[10..]),
        _ => url.to_string(),
    }
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> DatabaseFamily {
        self.family
    }

    async fn open(&self, url: &str, credentials: &Credentials) -> AppResult<Box<dyn Session>> {
        let mut options = MySqlConnectOptions::from_str(&mysql_url(url))
            .map_err(|e| AppError::SessionBuildFailed(e.to_string()))?;
        if let Some(username) = &credentials.username {
            options = options.username(username);
        }
        if let Some(password) = &credentials.password {
            options = options.password(password);
        }

        let conn = MySqlConnection::connect_with(&options)
            .await
            .map_err(connect_error)?;
        tracing::debug!(driver = %self.name, family = %self.family, "MySQL session opened");
        Ok(Box::new(MySqlSession {
            conn: Mutex::new(Some(conn)),
        }))
    }
}

struct MySqlSession {
    conn: Mutex<Option<MySqlConnection>>,
}

#[async_trait]
impl Session for MySqlSession {
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
                tracing::warn!(error = %e, "MySQL session did not close cleanly");
            }
        }
    }
}

fn decode_row(row: &MySqlRow) -> Vec<NativeValue> {
    (0..row.len()).map(|idx| decode_cell(row, idx)).collect()
}

fn decode_cell(row: &MySqlRow, idx: usize) -> NativeValue {
    let type_name = row.column(idx).type_info().name().to_string();
    let t = type_name.as_str();

    match t {
        "NULL" => NativeValue::Null,
        "BOOLEAN" => decode_as!(row, idx, bool, t, NativeValue::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            decode_as!(unchecked row, idx, i64, t, NativeValue::Int)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "YEAR" => decode_as!(unchecked row, idx, u64, t, NativeValue::UInt),
        "FLOAT" => decode_as!(row, idx, f32, t, |v: f32| NativeValue::Float(v.into())),
        "DOUBLE" => decode_as!(row, idx, f64, t, NativeValue::Float),
        "DECIMAL" => decode_as!(row, idx, Decimal, t, NativeValue::Decimal),
        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            decode_as!(row, idx, String, t, NativeValue::Text)
        }
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => decode_as!(unchecked row, idx, Vec<u8>, t, NativeValue::Bytes),
        "JSON" => decode_as!(row, idx, Json<Box<RawValue>>, t, |v: Json<Box<RawValue>>| {
            NativeValue::Json {
                type_name: type_name.clone(),
                text: v.0.get().to_string(),
            }
        }),
        "DATE" => decode_as!(row, idx, NaiveDate, t, NativeValue::Date),
        "TIME" => decode_as!(row, idx, NaiveTime, t, NativeValue::Time),
        "DATETIME" => decode_as!(row, idx, NaiveDateTime, t, NativeValue::Timestamp),
        "TIMESTAMP" => decode_as!(row, idx, DateTime<Utc>, t, NativeValue::TimestampTz),
        _ => match row.try_get_raw(idx) {
            Ok(raw) if sqlx::ValueRef::is_null(&raw) => NativeValue::Null,
            _ => undecoded(row, idx, t),
        },
    }
}
