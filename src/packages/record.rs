// src/packages/record.rs

//! Package records: one concrete build of a package
//!
//! Records are created when parsing a repodata fragment or an installed
//! prefix's metadata and are never mutated afterwards; an update replaces
//! the record.

use crate::error::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Kind of package a record describes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    /// A package that is fetched and linked into a prefix
    #[default]
    Normal,
    /// A synthetic package standing for a host capability; never fetched or linked
    VirtualSystem,
}

/// Identity of a record: two records with equal identity are the same installed unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PackageIdentity {
    pub channel: String,
    pub name: String,
    pub version: String,
    pub build: String,
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.channel.is_empty() {
            write!(f, "{}-{}-{}", self.name, self.version, self.build)
        } else {
            write!(f, "{}::{}-{}-{}", self.channel, self.name, self.version, self.build)
        }
    }
}

/// Descriptor of a concrete package build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub subdir: String,
    #[serde(default, rename = "fn")]
    pub file_name: String,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub constrains: Vec<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_noarch",
        skip_serializing_if = "Option::is_none"
    )]
    pub noarch: Option<String>,
    #[serde(default, deserialize_with = "deserialize_package_type")]
    pub package_type: PackageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl PackageRecord {
    /// Create a normal package record
    pub fn new(name: impl Into<String>, version: impl Into<String>, build: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        let build = build.into();
        let file_name = format!("{}-{}-{}.conda", name, version, build);
        Self {
            name,
            version,
            build,
            build_number: 0,
            channel: String::new(),
            subdir: String::new(),
            file_name,
            depends: Vec::new(),
            constrains: Vec::new(),
            noarch: None,
            package_type: PackageType::Normal,
            md5: None,
            sha256: None,
            size: None,
            timestamp: None,
        }
    }

    /// Create a virtual-system package record (e.g. `__glibc 2.35`)
    pub fn virtual_package(name: impl Into<String>, version: impl Into<String>) -> Self {
        let mut record = Self::new(name, version, "0");
        record.channel = "@".to_string();
        record.package_type = PackageType::VirtualSystem;
        record
    }

    /// Parse a repodata fragment for one package file
    ///
    /// The fragment rarely carries its own channel, subdir or file name, so
    /// the caller's provenance always wins.
    pub fn from_repodata_fragment(
        channel: &str,
        subdir: &str,
        file_name: &str,
        json: &str,
    ) -> Result<Self> {
        let mut record: PackageRecord = serde_json::from_str(json)?;
        record.channel = channel.to_string();
        if !subdir.is_empty() {
            record.subdir = subdir.to_string();
        }
        record.file_name = file_name.to_string();
        Ok(record)
    }

    /// Builder-style helper setting the dependency list
    pub fn with_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = depends.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style helper setting the channel
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// The identity derived from (name, version, build, channel)
    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity {
            channel: self.channel.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            build: self.build.clone(),
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.package_type == PackageType::VirtualSystem
    }

    /// Whether this is a `noarch: python` package
    pub fn is_noarch_python(&self) -> bool {
        self.noarch.as_deref() == Some("python")
    }
}

impl fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}

/// Accept `"python"`, `"generic"`, `true` (legacy generic), `false` or null
fn deserialize_noarch<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(kind)) => Some(kind),
        Some(serde_json::Value::Bool(true)) => Some("generic".to_string()),
        _ => None,
    })
}

/// Only `virtual_system` is meaningful here; `noarch_python`, `noarch_generic` and null are normal packages
fn deserialize_package_type<'de, D>(deserializer: D) -> std::result::Result<PackageType, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(match value.as_deref() {
        Some("virtual_system") => PackageType::VirtualSystem,
        _ => PackageType::Normal,
    })
}
