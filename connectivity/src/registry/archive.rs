//! Plugin archive inspection.
//!
//! A plugin archive is a `.zip` file. Entries named `<...>/<Stem>Driver.json`
//! are driver descriptors; their path, minus the extension and with `/`
//! replaced by `::`, is the qualified driver name. The JSON body is an
//! optional [`PluginManifest`].

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub(crate) const ARCHIVE_EXTENSION: &str = "zip";
const DESCRIPTOR_EXTENSION: &str = ".json";
const DRIVER_SUFFIX: &str = "Driver";
const NESTED_MARKERS: [char; 2] = ['$', '#'];

#[derive(Debug, thiserror::Error)]
pub(crate) enum ArchiveError {
    #[error("cannot open archive: {0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Contents of a driver descriptor entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct PluginManifest {
    /// Engine family that serves this driver; inferred from the name when absent.
    pub engine: Option<String>,
    /// Symbols this plugin makes available to other plugins.
    pub provides: Vec<String>,
    /// Symbols that must be provided by some plugin in the directory.
    pub requires: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct DescriptorEntry {
    pub qualified_name: String,
    pub manifest: PluginManifest,
}

/// Everything read from one archive.
#[derive(Debug, Clone)]
pub(crate) struct PluginArchive {
    pub file_name: String,
    /// Descriptor entries in archive order.
    pub descriptors: Vec<DescriptorEntry>,
    /// Qualified names of every file entry plus every declared `provides`.
    pub symbols: HashSet<String>,
}

/// Lists plugin archives in `dir`, sorted by file name. Subdirectories are ignored.
pub(crate) fn list_archives(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_archive = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXTENSION));
        if is_archive && path.is_file() {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

pub(crate) fn read_archive(path: &Path) -> Result<PluginArchive, ArchiveError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut zip = zip::ZipArchive::new(File::open(path)?)?;

    let mut descriptors = Vec::new();
    let mut symbols = HashSet::new();

    for index in 0..zip.len() {
        let mut entry = match zip.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(archive = %file_name, index, error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_string();
        symbols.insert(qualified_name(&entry_name));

        if !is_descriptor_entry(&entry_name) {
            continue;
        }

        let mut body = String::new();
        if let Err(e) = entry.read_to_string(&mut body) {
            tracing::warn!(archive = %file_name, entry = %entry_name, error = %e, "Skipping unreadable descriptor");
            continue;
        }
        let manifest = match parse_manifest(&body) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(archive = %file_name, entry = %entry_name, error = %e, "Skipping malformed descriptor");
                continue;
            }
        };
        symbols.extend(manifest.provides.iter().cloned());
        descriptors.push(DescriptorEntry {
            qualified_name: qualified_name(&entry_name),
            manifest,
        });
    }

    Ok(PluginArchive {
        file_name,
        descriptors,
        symbols,
    })
}

/// True for `.../<Stem>Driver.json` entries that are not nested definitions.
pub(crate) fn is_descriptor_entry(entry_name: &str) -> bool {
    let Some(path) = entry_name.strip_suffix(DESCRIPTOR_EXTENSION) else {
        return false;
    };
    let stem = path.rsplit('/').next().unwrap_or(path);
    stem.ends_with(DRIVER_SUFFIX) && !stem.contains(NESTED_MARKERS)
}

/// `org/acme/jdbc/AcmeDriver.json` -> `org::acme::jdbc::AcmeDriver`.
pub(crate) fn qualified_name(entry_name: &str) -> String {
    let trimmed = entry_name.trim_start_matches('/');
    let (dir, file) = match trimmed.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, trimmed),
    };
    let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
    match dir {
        Some(dir) => format!("{}::{}", dir.replace('/', "::"), stem),
        None => stem.to_string(),
    }
}

fn parse_manifest(body: &str) -> Result<PluginManifest, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(PluginManifest::default());
    }
    serde_json::from_str(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_entries_need_suffix_and_no_nesting() {
        assert!(is_descriptor_entry("postgresql/Driver.json"));
        assert!(is_descriptor_entry("com/acme/jdbc/AcmeDriver.json"));
        assert!(!is_descriptor_entry("postgresql/Driver$Inner.json"));
        assert!(!is_descriptor_entry("postgresql/Driver#1.json"));
        assert!(!is_descriptor_entry("postgresql/Driver.class"));
        assert!(!is_descriptor_entry("postgresql/Connection.json"));
    }

    #[test]
    fn qualified_names_use_double_colons() {
        assert_eq!(qualified_name("postgresql/Driver.json"), "postgresql::Driver");
        assert_eq!(qualified_name("Driver.json"), "Driver");
        assert_eq!(qualified_name("lib/native/pq.so"), "lib::native::pq");
    }

    #[test]
    fn empty_manifest_body_is_default() {
        assert_eq!(parse_manifest("  ").unwrap(), PluginManifest::default());
        let m = parse_manifest(r#"{"requires": ["netty::Buffer"]}"#).unwrap();
        assert_eq!(m.requires, vec!["netty::Buffer"]);
        assert!(m.engine.is_none());
        assert!(parse_manifest("{not json").is_err());
    }
}
