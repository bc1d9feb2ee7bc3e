//! Driver metadata models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Database family a driver belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseFamily {
    PostgreSQL,
    MySQL,
    ClickHouse,
    Oracle,
    H2,
    MariaDB,
    SqlServer,
    SQLite,
    Unknown,
}

impl DatabaseFamily {
    /// Detection order. Earlier entries win when a name contains several tokens.
    const DETECTION: [(&'static str, DatabaseFamily); 8] = [
        ("postgresql", DatabaseFamily::PostgreSQL),
        ("mysql", DatabaseFamily::MySQL),
        ("clickhouse", DatabaseFamily::ClickHouse),
        ("oracle", DatabaseFamily::Oracle),
        ("h2", DatabaseFamily::H2),
        ("mariadb", DatabaseFamily::MariaDB),
        ("sqlserver", DatabaseFamily::SqlServer),
        ("sqlite", DatabaseFamily::SQLite),
    ];

    /// Infers the family from a qualified driver name by case-insensitive substring match.
    pub fn infer(driver_name: &str) -> Self {
        let lower = driver_name.to_lowercase();
        Self::DETECTION
            .iter()
            .find(|(token, _)| lower.contains(token))
            .map(|(_, family)| *family)
            .unwrap_or(DatabaseFamily::Unknown)
    }

    /// Parses the lowercase wire name (`"postgresql"`, `"mysql"`...).
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        Self::DETECTION
            .iter()
            .find(|(token, _)| *token == lower)
            .map(|(_, family)| *family)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseFamily::PostgreSQL => "PostgreSQL",
            DatabaseFamily::MySQL => "MySQL",
            DatabaseFamily::ClickHouse => "ClickHouse",
            DatabaseFamily::Oracle => "Oracle",
            DatabaseFamily::H2 => "H2",
            DatabaseFamily::MariaDB => "MariaDB",
            DatabaseFamily::SqlServer => "SQL Server",
            DatabaseFamily::SQLite => "SQLite",
            DatabaseFamily::Unknown => "Unknown",
        }
    }

    /// Default TCP port, used when a URL omits one.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            DatabaseFamily::PostgreSQL => Some(5432),
            DatabaseFamily::MySQL | DatabaseFamily::MariaDB => Some(3306),
            DatabaseFamily::ClickHouse => Some(8123),
            DatabaseFamily::Oracle => Some(1521),
            DatabaseFamily::H2 => Some(9092),
            DatabaseFamily::SqlServer => Some(1433),
            DatabaseFamily::SQLite | DatabaseFamily::Unknown => None,
        }
    }
}

impl std::fmt::Display for DatabaseFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = Self::DETECTION
            .iter()
            .find(|(_, family)| family == self)
            .map(|(token, _)| *token)
            .unwrap_or("unknown");
        f.write_str(name)
    }
}

/// A driver discovered in a plugin archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverDescriptor {
    /// Qualified driver name, e.g. `postgresql::Driver`.
    pub driver_class_name: String,
    /// File name of the archive the driver was found in.
    pub archive_file_name: String,
    pub database_type: DatabaseFamily,
    pub display_name: String,
    pub available: bool,
}

impl DriverDescriptor {
    pub fn discovered(driver_class_name: String, archive_file_name: String) -> Self {
        let family = DatabaseFamily::infer(&driver_class_name);
        Self {
            driver_class_name,
            archive_file_name,
            database_type: family,
            display_name: family.display_name().to_string(),
            available: true,
        }
    }
}
