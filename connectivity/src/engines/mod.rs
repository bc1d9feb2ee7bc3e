//! Statically linked database engines.
//!
//! Each engine implements [`DatabaseDriver`] and opens exactly one live
//! connection per [`Session`]. Cells are decoded into [`NativeValue`] here so
//! nothing above this module sees engine-specific types.

mod mysql;
mod postgres;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use common::models::DatabaseFamily;
use sqlx::{ColumnIndex, Decode, Row};

use crate::value::NativeValue;

pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

/// A resolved, ready-to-use driver.
pub type DriverHandle = Arc<dyn DatabaseDriver>;

pub const POSTGRES_DRIVER: &str = "postgresql::Driver";
pub const MYSQL_DRIVER: &str = "mysql::Driver";
pub const MARIADB_DRIVER: &str = "mariadb::Driver";
pub const SQLITE_DRIVER: &str = "sqlite::Driver";

/// Login credentials passed alongside the URL.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Qualified name the driver was resolved under.
    fn name(&self) -> &str;

    fn family(&self) -> DatabaseFamily;

    /// Opens one live session. Malformed URLs fail with `SessionBuildFailed`,
    /// unreachable servers with `ConnectionFailed`.
    async fn open(&self, url: &str, credentials: &Credentials) -> AppResult<Box<dyn Session>>;
}

/// One live database connection.
#[async_trait]
pub trait Session: Send + Sync {
    async fn query(&self, sql: &str) -> AppResult<RowSet>;

    async fn ping(&self) -> AppResult<()>;

    /// Closes the connection. Later calls on the session fail.
    async fn close(&self);
}

/// Raw rows as decoded by an engine.
#[derive(Debug, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<NativeValue>>,
}

/// Looks up a statically linked driver by qualified name.
pub fn builtin(name: &str) -> Option<DriverHandle> {
    match name {
        POSTGRES_DRIVER => Some(Arc::new(PostgresDriver::new(name))),
        MYSQL_DRIVER => Some(Arc::new(MySqlDriver::new(name, DatabaseFamily::MySQL))),
        MARIADB_DRIVER => Some(Arc::new(MySqlDriver::new(name, DatabaseFamily::MariaDB))),
        SQLITE_DRIVER => Some(Arc::new(SqliteDriver::new(name))),
        _ => None,
    }
}

/// Engine for a plugin-declared family, registered under the plugin's driver name.
pub fn for_family(family: DatabaseFamily, name: &str) -> Option<DriverHandle> {
    match family {
        DatabaseFamily::PostgreSQL => Some(Arc::new(PostgresDriver::new(name))),
        DatabaseFamily::MySQL | DatabaseFamily::MariaDB => Some(Arc::new(MySqlDriver::new(name, family))),
        DatabaseFamily::SQLite => Some(Arc::new(SqliteDriver::new(name))),
        DatabaseFamily::ClickHouse
        | DatabaseFamily::Oracle
        | DatabaseFamily::H2
        | DatabaseFamily::SqlServer
        | DatabaseFamily::Unknown => None,
    }
}

/// Last-resort decoding for types the engine has no mapping for.
///
/// The raw value is kept as bytes (rendered as `\x` hex downstream). Wire
/// bytes are never reinterpreted as text: binary encodings of unmapped types
/// are not their text form.
pub(crate) fn undecoded<'r, R>(row: &'r R, idx: usize, type_name: &str) -> NativeValue
where
    R: Row,
    usize: ColumnIndex<R>,
    Vec<u8>: Decode<'r, R::Database>,
{
    if let Ok(bytes) = row.try_get_unchecked::<Vec<u8>, _>(idx) {
        return NativeValue::Bytes(bytes);
    }
    tracing::debug!(column = idx, type_name, "Cell could not be decoded");
    placeholder(type_name)
}

pub(crate) fn placeholder(type_name: &str) -> NativeValue {
    NativeValue::Other {
        type_name: type_name.to_string(),
        text: format!("<{}>", type_name.to_lowercase()),
    }
}

/// Decodes a nullable cell, mapping decode failures to the fallback path.
///
/// The `unchecked` form skips sqlx's type compatibility check, for types whose
/// decoder accepts more wire widths than the check admits.
macro_rules! decode_as {
    (unchecked $row:expr, $idx:expr, $ty:ty, $type_name:expr, $wrap:expr) => {
        match $row.try_get_unchecked::<Option<$ty>, _>($idx) {
            Ok(Some(v)) => $wrap(v),
            Ok(None) => $crate::value::NativeValue::Null,
            Err(_) => $crate::engines::undecoded($row, $idx, $type_name),
        }
    };
    ($row:expr, $idx:expr, $ty:ty, $type_name:expr, $wrap:expr) => {
        match $row.try_get::<Option<$ty>, _>($idx) {
            Ok(Some(v)) => $wrap(v),
            Ok(None) => $crate::value::NativeValue::Null,
            Err(_) => $crate::engines::undecoded($row, $idx, $type_name),
        }
    };
}
pub(crate) use decode_as;

/// Accepts JDBC-style URLs (`jdbc:postgresql://...`) as well as native ones.
pub(crate) fn native_url(url: &str) -> &str {
    let trimmed = url.trim();
    match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &trimmed[5..],
        _ => trimmed,
    }
}

/// Prefers the server's own message over sqlx's wrapper text.
pub(crate) fn query_error(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(db) => AppError::QueryFailed(db.message().to_string()),
        other => AppError::QueryFailed(other.to_string()),
    }
}

pub(crate) fn connect_error(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Configuration(inner) => AppError::SessionBuildFailed(inner.to_string()),
        sqlx::Error::Database(db) => AppError::ConnectionFailed(db.message().to_string()),
        other => AppError::ConnectionFailed(other.to_string()),
    }
}

/// Wraps a decoded array, keeping NULL elements.
pub(crate) fn array_of<T>(items: Vec<Option<T>>, wrap: impl Fn(T) -> NativeValue) -> NativeValue {
    NativeValue::Array(
        items
            .into_iter()
            .map(|item| item.map(&wrap).unwrap_or(NativeValue::Null))
            .collect(),
    )
}
