// src/repository/repodata.rs

//! Subdir index documents
//!
//! Parses `repodata.json` into package records and converts records to and
//! from the packed native form kept next to the JSON cache.

use crate::error::{Error, Result};
use crate::packages::PackageRecord;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// zstd level for the packed native form
const PACK_LEVEL: i32 = 3;

/// `info` block of a repodata document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepodataInfo {
    #[serde(default)]
    pub subdir: Option<String>,
}

/// A parsed `repodata.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repodata {
    #[serde(default)]
    pub info: Option<RepodataInfo>,
    #[serde(default)]
    pub packages: IndexMap<String, PackageRecord>,
    #[serde(default, rename = "packages.conda")]
    pub conda_packages: IndexMap<String, PackageRecord>,
    #[serde(default)]
    pub removed: Vec<String>,
    #[serde(default)]
    pub repodata_version: Option<u32>,
}

impl Repodata {
    /// Parse a repodata document
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::ParseError(format!("Invalid repodata.json: {}", e)))
    }

    /// Flatten into records stamped with their provenance
    ///
    /// A `.tar.bz2` artifact is skipped when the same build is also offered
    /// as `.conda`; files listed under `removed` are skipped entirely.
    pub fn into_records(self, channel: &str, subdir: &str) -> Vec<PackageRecord> {
        let subdir = self
            .info
            .as_ref()
            .and_then(|info| info.subdir.as_deref())
            .unwrap_or(subdir)
            .to_string();
        let removed: HashSet<String> = self.removed.into_iter().collect();
        let conda_stems: HashSet<String> = self
            .conda_packages
            .keys()
            .filter_map(|name| name.strip_suffix(".conda"))
            .map(str::to_string)
            .collect();

        let tarballs = self.packages.into_iter().filter(|(file_name, _)| {
            file_name
                .strip_suffix(".tar.bz2")
                .is_none_or(|stem| !conda_stems.contains(stem))
        });

        tarballs
            .chain(self.conda_packages)
            .filter(|(file_name, _)| !removed.contains(file_name))
            .map(|(file_name, mut record)| {
                record.file_name = file_name;
                record.channel = channel.to_string();
                if record.subdir.is_empty() {
                    record.subdir = subdir.clone();
                }
                record
            })
            .collect()
    }
}

/// Encode records into the packed native form
pub fn pack_records(records: &[PackageRecord]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(records)?;
    zstd::encode_all(json.as_slice(), PACK_LEVEL).map_err(Error::from)
}

/// Decode records from the packed native form
pub fn unpack_records(bytes: &[u8]) -> Result<Vec<PackageRecord>> {
    let json = zstd::decode_all(bytes)
        .map_err(|e| Error::ParseError(format!("Failed to decompress packed index: {}", e)))?;
    serde_json::from_slice(&json)
        .map_err(|e| Error::ParseError(format!("Invalid packed index: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPODATA: &str = r#"{
        "info": {"subdir": "linux-64"},
        "packages": {
            "xtl-0.7.0-h1.tar.bz2": {"name": "xtl", "version": "0.7.0", "build": "h1", "depends": []},
            "xtl-0.7.1-h1.tar.bz2": {"name": "xtl", "version": "0.7.1", "build": "h1", "depends": []},
            "old-1.0-0.tar.bz2": {"name": "old", "version": "1.0", "build": "0"}
        },
        "packages.conda": {
            "xtl-0.7.1-h1.conda": {"name": "xtl", "version": "0.7.1", "build": "h1", "depends": []},
            "xtensor-0.24.0-abc.conda": {"name": "xtensor", "version": "0.24.0", "build": "abc", "depends": ["xtl >=0.7,<0.8"]}
        },
        "removed": ["old-1.0-0.tar.bz2"],
        "repodata_version": 1
    }"#;

    #[test]
    fn test_into_records_prefers_conda_artifacts() {
        let repodata = Repodata::from_slice(REPODATA.as_bytes()).unwrap();
        let records = repodata.into_records("conda-forge", "linux-64");
        let files: Vec<&str> = records.iter().map(|r| r.file_name.as_str()).collect();

        assert_eq!(
            files,
            vec!["xtl-0.7.0-h1.tar.bz2", "xtl-0.7.1-h1.conda", "xtensor-0.24.0-abc.conda"]
        );
        assert!(records.iter().all(|r| r.channel == "conda-forge"));
        assert!(records.iter().all(|r| r.subdir == "linux-64"));
    }

    #[test]
    fn test_invalid_repodata() {
        assert!(matches!(
            Repodata::from_slice(b"not json"),
            Err(Error::ParseError(_))
        ));
    }

    #[test]
    fn test_packed_form_preserves_records() {
        let records = Repodata::from_slice(REPODATA.as_bytes())
            .unwrap()
            .into_records("conda-forge", "linux-64");
        let packed = pack_records(&records).unwrap();
        assert_eq!(unpack_records(&packed).unwrap(), records);
    }
}
