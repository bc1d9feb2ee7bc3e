//! Driver registry.
//!
//! Discovers driver plugins in a flat directory of archives and resolves
//! qualified driver names to [`DriverHandle`]s. Plugins are resolved against
//! an isolated [`PluginContext`] built per call from every archive in the
//! directory; names no plugin declares fall back to the statically linked
//! engines.

mod archive;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use common::errors::{AppError, AppResult};
use common::models::{DatabaseFamily, DriverDescriptor};

use crate::engines::{self, DriverHandle};
use archive::{list_archives, read_archive, DescriptorEntry, PluginArchive};

/// Names accepted as drivers even without the `dbc` marker.
pub const WELL_KNOWN_DRIVERS: [&str; 8] = [
    "postgresql::Driver",
    "mysql::Driver",
    "mariadb::Driver",
    "clickhouse::ClickHouseDriver",
    "oracle::OracleDriver",
    "h2::Driver",
    "sqlserver::SqlServerDriver",
    "sqlite::Driver",
];

const DRIVER_MARKER: &str = "dbc";
const DRIVER_SUFFIX: &str = "Driver";

pub struct DriverRegistry {
    plugin_dir: PathBuf,
}

impl DriverRegistry {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Lists one descriptor per archive that contains a recognizable driver.
    ///
    /// Never fails: a missing directory yields an empty list and broken
    /// archives are skipped. The directory is rescanned on every call.
    pub async fn list_drivers(&self) -> Vec<DriverDescriptor> {
        let dir = self.plugin_dir.clone();
        match tokio::task::spawn_blocking(move || scan_drivers(&dir)).await {
            Ok(drivers) => drivers,
            Err(e) => {
                tracing::error!(error = %e, "Driver scan task failed");
                Vec::new()
            }
        }
    }

    /// Resolves `name` to a driver handle, plugins first.
    pub async fn load_driver(&self, name: &str) -> AppResult<DriverHandle> {
        let dir = self.plugin_dir.clone();
        let owned = name.to_string();
        tokio::task::spawn_blocking(move || resolve_driver(&dir, &owned))
            .await
            .map_err(|e| AppError::Internal(format!("driver loading task failed: {}", e)))?
    }
}

/// True when `name` is treated as a driver entry point.
pub fn is_driver_name(name: &str) -> bool {
    WELL_KNOWN_DRIVERS.contains(&name) || (name.contains(DRIVER_MARKER) && name.ends_with(DRIVER_SUFFIX))
}

fn scan_drivers(dir: &Path) -> Vec<DriverDescriptor> {
    let archives = match list_archives(dir) {
        Ok(archives) => archives,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Driver directory not readable");
            return Vec::new();
        }
    };

    let mut drivers = Vec::new();
    for path in archives {
        let archive = match read_archive(&path) {
            Ok(archive) => archive,
            Err(e) => {
                tracing::warn!(archive = %path.display(), error = %e, "Skipping plugin archive");
                continue;
            }
        };
        match archive
            .descriptors
            .iter()
            .find(|d| is_driver_name(&d.qualified_name))
        {
            Some(entry) => {
                tracing::debug!(archive = %archive.file_name, driver = %entry.qualified_name, "Found driver");
                drivers.push(DriverDescriptor::discovered(
                    entry.qualified_name.clone(),
                    archive.file_name.clone(),
                ));
            }
            None => tracing::debug!(archive = %archive.file_name, "No driver in archive"),
        }
    }

    tracing::info!(dir = %dir.display(), count = drivers.len(), "Scanned driver plugins");
    drivers
}

fn resolve_driver(dir: &Path, name: &str) -> AppResult<DriverHandle> {
    let archives = list_archives(dir).unwrap_or_default();
    if archives.is_empty() {
        tracing::debug!(driver = %name, "No plugin archives, using linked drivers");
        return builtin_or_unavailable(name);
    }

    let context = PluginContext::load(&archives);
    let Some(entry) = context.descriptor(name) else {
        return builtin_or_unavailable(name);
    };

    if let Some(symbol) = context.first_unresolved(entry) {
        return Err(AppError::MissingDependency {
            driver: name.to_string(),
            symbol: symbol.to_string(),
        });
    }

    let family = entry
        .manifest
        .engine
        .as_deref()
        .and_then(DatabaseFamily::parse)
        .unwrap_or_else(|| DatabaseFamily::infer(name));

    let handle = engines::for_family(family, name).ok_or_else(|| {
        AppError::DriverNotAvailable(format!("{} (no {} engine in this build)", name, family.display_name()))
    })?;
    tracing::info!(driver = %name, family = %family, "Loaded driver from plugin");
    Ok(handle)
}

fn builtin_or_unavailable(name: &str) -> AppResult<DriverHandle> {
    engines::builtin(name).ok_or_else(|| AppError::DriverNotAvailable(name.to_string()))
}

/// Symbols and descriptors from every archive in the plugin directory.
/// Lives for a single `load_driver` call.
struct PluginContext {
    archives: Vec<PluginArchive>,
    symbols: HashSet<String>,
}

impl PluginContext {
    fn load(paths: &[PathBuf]) -> Self {
        let archives: Vec<PluginArchive> = paths
            .iter()
            .filter_map(|path| match read_archive(path) {
                Ok(archive) => Some(archive),
                Err(e) => {
                    tracing::warn!(archive = %path.display(), error = %e, "Skipping plugin archive");
                    None
                }
            })
            .collect();
        let symbols = archives
            .iter()
            .flat_map(|a| a.symbols.iter().cloned())
            .collect();
        Self { archives, symbols }
    }

    fn descriptor(&self, name: &str) -> Option<&DescriptorEntry> {
        self.archives
            .iter()
            .flat_map(|a| a.descriptors.iter())
            .find(|d| d.qualified_name == name)
    }

    fn first_unresolved<'a>(&self, entry: &'a DescriptorEntry) -> Option<&'a str> {
        entry
            .manifest
            .requires
            .iter()
            .find(|symbol| !self.symbols.contains(symbol.as_str()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_archive(dir: &Path, file: &str, entries: &[(&str, &str)]) {
        let out = std::fs::File::create(dir.join(file)).unwrap();
        let mut zip = ZipWriter::new(out);
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, body) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn missing_directory_lists_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = DriverRegistry::new(tmp.path().join("does-not-exist"));
        assert!(registry.list_drivers().await.is_empty());
    }

    #[tokio::test]
    async fn empty_directory_lists_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = DriverRegistry::new(tmp.path());
        assert!(registry.list_drivers().await.is_empty());
    }

    #[tokio::test]
    async fn lists_first_driver_per_archive_sorted_by_file() {
        let tmp = tempfile::tempdir().unwrap();
        write_archive(
            tmp.path(),
            "b-postgres.zip",
            &[
                ("postgresql/util/Helpers.json", ""),
                ("postgresql/Driver$Inner.json", ""),
                ("postgresql/Driver.json", ""),
            ],
        );
        write_archive(
            tmp.path(),
            "a-vendor.zip",
            &[("com/vendor/jdbc/VendorDriver.json", ""), ("mysql/Driver.json", "")],
        );
        write_archive(tmp.path(), "c-misc.zip", &[("misc/Thing.json", "")]);
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(tmp.path().join("broken.zip"), "not a zip").unwrap();

        let drivers = DriverRegistry::new(tmp.path()).list_drivers().await;
        assert_eq!(drivers.len(), 2);

        assert_eq!(drivers[0].archive_file_name, "a-vendor.zip");
        assert_eq!(drivers[0].driver_class_name, "com::vendor::jdbc::VendorDriver");
        assert_eq!(drivers[0].database_type, DatabaseFamily::Unknown);
        assert_eq!(drivers[0].display_name, "Unknown");

        assert_eq!(drivers[1].archive_file_name, "b-postgres.zip");
        assert_eq!(drivers[1].driver_class_name, "postgresql::Driver");
        assert_eq!(drivers[1].database_type, DatabaseFamily::PostgreSQL);
        assert!(drivers[1].available);
    }

    #[tokio::test]
    async fn without_archives_linked_drivers_are_used() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = DriverRegistry::new(tmp.path());
        let driver = registry.load_driver("sqlite::Driver").await.unwrap();
        assert_eq!(driver.family(), DatabaseFamily::SQLite);
    }

    #[tokio::test]
    async fn unknown_name_is_not_available() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = DriverRegistry::new(tmp.path());
        let err = registry.load_driver("com::nowhere::jdbc::GhostDriver").await.err().unwrap();
        assert!(matches!(err, AppError::DriverNotAvailable(_)));

        write_archive(tmp.path(), "pg.zip", &[("postgresql/Driver.json", "")]);
        let err = registry.load_driver("com::nowhere::jdbc::GhostDriver").await.err().unwrap();
        assert!(matches!(err, AppError::DriverNotAvailable(_)));
    }

    #[tokio::test]
    async fn unresolved_requirement_names_the_symbol() {
        let tmp = tempfile::tempdir().unwrap();
        write_archive(
            tmp.path(),
            "pg.zip",
            &[(
                "com/acme/jdbc/AcmeDriver.json",
                r#"{"engine": "postgresql", "requires": ["netty::buffer::ByteBuf"]}"#,
            )],
        );
        let registry = DriverRegistry::new(tmp.path());

        match registry.load_driver("com::acme::jdbc::AcmeDriver").await {
            Err(AppError::MissingDependency { driver, symbol }) => {
                assert_eq!(driver, "com::acme::jdbc::AcmeDriver");
                assert_eq!(symbol, "netty::buffer::ByteBuf");
            }
            other => panic!("unexpected result: {:?}", other.map(|d| d.name().to_string())),
        }

        // A second archive providing the symbol satisfies the requirement.
        write_archive(tmp.path(), "netty.zip", &[("netty/buffer/ByteBuf.class", "")]);
        let driver = registry.load_driver("com::acme::jdbc::AcmeDriver").await.unwrap();
        assert_eq!(driver.name(), "com::acme::jdbc::AcmeDriver");
        assert_eq!(driver.family(), DatabaseFamily::PostgreSQL);
    }

    #[tokio::test]
    async fn plugin_for_family_without_engine_is_not_available() {
        let tmp = tempfile::tempdir().unwrap();
        write_archive(tmp.path(), "h2.zip", &[("h2/Driver.json", "")]);
        let err = DriverRegistry::new(tmp.path())
            .load_driver("h2::Driver")
            .await
            .err()
            .unwrap();
        assert_eq!(err.category(), "DriverNotAvailable");
    }

    #[test]
    fn driver_names_follow_marker_rule() {
        assert!(is_driver_name("oracle::OracleDriver"));
        assert!(is_driver_name("com::acme::jdbc::AcmeDriver"));
        assert!(!is_driver_name("com::acme::AcmeDriver"));
        assert!(!is_driver_name("com::acme::jdbc::Helper"));
    }
}
