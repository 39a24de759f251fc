// src/packages/spec.rs

//! Package specs: a name plus an optional version/build constraint
//!
//! Only the name takes part in matching here. Evaluating the constraint is
//! the solver's job.

use super::record::PackageRecord;
use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Characters that end the name part of a spec
const NAME_TERMINATORS: &[char] = &['=', '<', '>', '!', '~', '[', ' ', '\t'];

/// Extract the bare package name from a dependency string
///
/// `"numpy >=1.21"`, `"numpy>=1.21"`, `"conda-forge::numpy 1.2.*"` all yield `"numpy"`.
pub fn dependency_name(dep: &str) -> &str {
    let dep = dep.trim();
    let dep = match dep.rfind("::") {
        Some(pos) => &dep[pos + 2..],
        None => dep,
    };
    let end = dep.find(NAME_TERMINATORS).unwrap_or(dep.len());
    &dep[..end]
}

/// A package name with an optional constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Spec {
    pub name: String,
    pub constraint: Option<String>,
}

impl Spec {
    /// Create a spec matching any version of `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
        }
    }

    /// Create a spec with a version constraint
    pub fn with_constraint(name: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: Some(constraint.into()),
        }
    }

    /// Whether this spec refers to the given record
    pub fn matches(&self, record: &PackageRecord) -> bool {
        self.name == record.name
    }
}

impl FromStr for Spec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let name = dependency_name(trimmed);
        if name.is_empty() {
            return Err(Error::InvalidSpec(s.to_string()));
        }

        // Everything after the name, minus the channel prefix if any
        let after_channel = match trimmed.rfind("::") {
            Some(pos) => &trimmed[pos + 2..],
            None => trimmed,
        };
        let rest = after_channel[name.len()..].trim();

        Ok(Self {
            name: name.to_string(),
            constraint: (!rest.is_empty()).then(|| rest.to_string()),
        })
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(constraint) => write!(f, "{} {}", self.name, constraint),
            None => write!(f, "{}", self.name),
        }
    }
}

impl Serialize for Spec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Spec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_name() {
        assert_eq!(dependency_name("numpy"), "numpy");
        assert_eq!(dependency_name("numpy >=1.21"), "numpy");
        assert_eq!(dependency_name("numpy>=1.21,<2"), "numpy");
        assert_eq!(dependency_name("python_abi 3.11.* *_cp311"), "python_abi");
        assert_eq!(dependency_name("conda-forge::xtl 0.7"), "xtl");
        assert_eq!(dependency_name("libgcc-ng[version='>=12']"), "libgcc-ng");
    }

    #[test]
    fn test_parse_spec() {
        let spec: Spec = "flask".parse().unwrap();
        assert_eq!(spec, Spec::new("flask"));

        let spec: Spec = "xtl >=0.7,<0.8".parse().unwrap();
        assert_eq!(spec.name, "xtl");
        assert_eq!(spec.constraint.as_deref(), Some(">=0.7,<0.8"));

        let spec: Spec = "python=3.11".parse().unwrap();
        assert_eq!(spec.name, "python");
        assert_eq!(spec.constraint.as_deref(), Some("=3.11"));

        assert!("".parse::<Spec>().is_err());
        assert!(">=1.0".parse::<Spec>().is_err());
    }

    #[test]
    fn test_spec_display() {
        assert_eq!(Spec::new("click").to_string(), "click");
        assert_eq!(Spec::with_constraint("python", "3.11.*").to_string(), "python 3.11.*");
    }

    #[test]
    fn test_spec_serde_as_string() {
        let json = serde_json::to_string(&Spec::with_constraint("xtl", ">=0.7")).unwrap();
        assert_eq!(json, "\"xtl >=0.7\"");
        let spec: Spec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec.constraint.as_deref(), Some(">=0.7"));
    }
}
