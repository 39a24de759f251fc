// src/transaction/prefix.rs

//! Installed package snapshot of a prefix
//!
//! Records are keyed by package name and keep their load order. Installed
//! metadata lives in `<prefix>/conda-meta/<name>-<version>-<build>.json`.

use crate::error::{Error, Result};
use crate::packages::PackageRecord;
use crate::repository::channel::Channel;
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

/// Metadata directory below a prefix
pub const CONDA_META: &str = "conda-meta";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixRecords {
    records: IndexMap<String, PackageRecord>,
}

impl PrefixRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot; a later record replaces an earlier one of the same name
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = PackageRecord>,
    {
        let mut snapshot = Self::new();
        for record in records {
            snapshot.insert(record);
        }
        snapshot
    }

    /// Read the installed records of `prefix`
    ///
    /// Files are read in file-name order. Channel URLs are reduced to
    /// canonical channel names against `channel_alias` so installed records
    /// compare equal to records from the loaded index.
    pub fn load(prefix: &Path, channel_alias: &Url) -> Result<Self> {
        let meta_dir = prefix.join(CONDA_META);
        if !meta_dir.is_dir() {
            debug!("No {} in {}, prefix is empty", CONDA_META, prefix.display());
            return Ok(Self::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&meta_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut snapshot = Self::new();
        for path in paths {
            let bytes = fs::read(&path)?;
            let mut record: PackageRecord = serde_json::from_slice(&bytes)
                .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))?;
            if !record.channel.is_empty() {
                match Channel::parse(&record.channel, channel_alias) {
                    Ok(channel) => record.channel = channel.canonical_name().to_string(),
                    Err(e) => warn!("Keeping unparsed channel of {}: {}", path.display(), e),
                }
            }
            snapshot.insert(record);
        }

        debug!("Loaded {} installed records from {}", snapshot.len(), prefix.display());
        Ok(snapshot)
    }

    /// Add virtual-system packages describing the host
    pub fn with_virtual_packages<I>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = PackageRecord>,
    {
        for package in packages {
            if package.is_virtual() {
                self.insert(package);
            }
        }
        self
    }

    pub fn insert(&mut self, record: PackageRecord) -> Option<PackageRecord> {
        self.records.insert(record.name.clone(), record)
    }

    pub fn remove(&mut self, name: &str) -> Option<PackageRecord> {
        self.records.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.records.get(name)
    }

    pub fn find_by_filename(&self, file_name: &str) -> Option<&PackageRecord> {
        self.records.values().find(|r| r.file_name == file_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_vec(&self) -> Vec<PackageRecord> {
        self.records.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::PackageType;
    use tempfile::TempDir;

    fn alias() -> Url {
        Url::parse("https://conda.anaconda.org").unwrap()
    }

    fn write_meta(prefix: &Path, file: &str, json: &str) {
        let dir = prefix.join(CONDA_META);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), json).unwrap();
    }

    #[test]
    fn test_load_prefix() {
        let prefix = TempDir::new().unwrap();
        write_meta(
            prefix.path(),
            "xtl-0.7.0-h1.json",
            r#"{"name": "xtl", "version": "0.7.0", "build": "h1",
                "channel": "https://conda.anaconda.org/conda-forge/linux-64",
                "fn": "xtl-0.7.0-h1.tar.bz2"}"#,
        );
        write_meta(
            prefix.path(),
            "six-1.16.0-pyh6c4a22f_0.json",
            r#"{"name": "six", "version": "1.16.0", "build": "pyh6c4a22f_0", "noarch": "python",
                "channel": "conda-forge", "fn": "six-1.16.0-pyh6c4a22f_0.conda"}"#,
        );
        write_meta(prefix.path(), "history", "==> 2024-01-01 <==");

        let records = PrefixRecords::load(prefix.path(), &alias()).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["six", "xtl"]);

        let xtl = records.get("xtl").unwrap();
        assert_eq!(xtl.channel, "conda-forge");
        assert_eq!(xtl.subdir, "");
        assert_eq!(
            records.find_by_filename("xtl-0.7.0-h1.tar.bz2").map(|r| r.name.as_str()),
            Some("xtl")
        );
        assert!(records.get("six").unwrap().is_noarch_python());
    }

    #[test]
    fn test_load_prefix_with_conda_package_types() {
        let prefix = TempDir::new().unwrap();
        write_meta(
            prefix.path(),
            "six-1.16.0-pyh_0.json",
            r#"{"name": "six", "version": "1.16.0", "build": "pyh_0", "noarch": "python",
                "package_type": "noarch_python", "channel": "conda-forge"}"#,
        );
        write_meta(
            prefix.path(),
            "tzdata-2024a-h0.json",
            r#"{"name": "tzdata", "version": "2024a", "build": "h0", "noarch": "generic",
                "package_type": "noarch_generic", "channel": "conda-forge"}"#,
        );
        write_meta(
            prefix.path(),
            "zlib-1.3-h0.json",
            r#"{"name": "zlib", "version": "1.3", "build": "h0", "package_type": null,
                "channel": "conda-forge"}"#,
        );

        let records = PrefixRecords::load(prefix.path(), &alias()).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.package_type == PackageType::Normal));
        assert!(records.get("six").unwrap().is_noarch_python());
    }

    #[test]
    fn test_load_missing_prefix() {
        let prefix = TempDir::new().unwrap();
        let records = PrefixRecords::load(&prefix.path().join("nope"), &alias()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_load_invalid_record() {
        let prefix = TempDir::new().unwrap();
        write_meta(prefix.path(), "broken.json", "{");
        assert!(matches!(
            PrefixRecords::load(prefix.path(), &alias()),
            Err(Error::ParseError(_))
        ));
    }

    #[test]
    fn test_virtual_packages_and_replacement() {
        let mut records = PrefixRecords::from_records(vec![PackageRecord::new("zlib", "1.2.13", "0")])
            .with_virtual_packages(vec![
                PackageRecord::virtual_package("__glibc", "2.35"),
                PackageRecord::new("not-virtual", "1", "0"),
            ]);
        assert_eq!(records.len(), 2);
        assert!(records.get("__glibc").unwrap().is_virtual());

        let old = records.insert(PackageRecord::new("zlib", "1.3", "0")).unwrap();
        assert_eq!(old.version, "1.2.13");
        assert_eq!(records.to_vec()[0].version, "1.3");
        assert!(records.remove("zlib").is_some());
        assert_eq!(records.len(), 1);
    }
}
