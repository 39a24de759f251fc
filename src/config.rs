// src/config.rs

//! Runtime configuration
//!
//! Settings are read from a TOML file. Every key is optional; a missing file
//! yields the defaults.

use crate::error::{Error, Result};
use crate::packages::Spec;
use crate::repository::cache::{ResolveOptions, TtlPolicy};
use crate::repository::channel::host_subdir;
use crate::repository::loader::{DEFAULT_CHANNEL_ALIAS, DEFAULT_CHANNELS, PriorityMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

/// Directory below a package cache root holding subdir indices
const INDEX_CACHE_DIR: &str = "cache";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Channels searched for packages, highest priority first
    pub channels: Vec<String>,
    /// Expansion of the `defaults` channel
    pub default_channels: Vec<String>,
    /// Base URL bare channel names resolve against
    pub channel_alias: String,
    pub channel_priority: PriorityMode,
    /// Seconds a cached index stays fresh: `> 1` fixed, `1` server max-age, `<= 0` always revalidate
    pub local_repodata_ttl: i64,
    /// Never touch the network
    pub offline: bool,
    /// Use any cached index without checking freshness
    pub use_index_cache: bool,
    /// Package cache roots, tried in order for a writable index cache
    pub pkgs_dirs: Vec<PathBuf>,
    /// Packages that must keep their installed version
    pub pinned_packages: Vec<Spec>,
    /// Target platform subdir
    pub subdir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: vec!["defaults".to_string()],
            default_channels: DEFAULT_CHANNELS.iter().map(|s| s.to_string()).collect(),
            channel_alias: DEFAULT_CHANNEL_ALIAS.to_string(),
            channel_priority: PriorityMode::default(),
            local_repodata_ttl: 1,
            offline: false,
            use_index_cache: false,
            pkgs_dirs: default_pkgs_dirs(),
            pinned_packages: Vec::new(),
            subdir: host_subdir().to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::ConfigError(e.to_string()))
    }

    pub fn channel_alias(&self) -> Result<Url> {
        Url::parse(&self.channel_alias)
            .map_err(|e| Error::ConfigError(format!("Invalid channel_alias '{}': {}", self.channel_alias, e)))
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            offline: self.offline,
            use_index_cache: self.use_index_cache,
            ttl: TtlPolicy::from_seconds(self.local_repodata_ttl),
        }
    }

    /// First package cache root whose index cache directory can be created
    pub fn writable_cache_dir(&self) -> Result<PathBuf> {
        for root in &self.pkgs_dirs {
            let dir = root.join(INDEX_CACHE_DIR);
            match fs::create_dir_all(&dir) {
                Ok(()) => return Ok(dir),
                Err(e) => warn!("Index cache {} not writable: {}", dir.display(), e),
            }
        }
        Err(Error::ConfigError(
            "No writable package cache directory configured".to_string(),
        ))
    }

    /// Index cache directories after `current`, for retrying a cache write failure
    pub fn fallback_cache_dirs(&self, current: &Path) -> Vec<PathBuf> {
        self.pkgs_dirs
            .iter()
            .map(|root| root.join(INDEX_CACHE_DIR))
            .skip_while(|dir| dir != current)
            .skip(1)
            .collect()
    }
}

fn default_pkgs_dirs() -> Vec<PathBuf> {
    match std::env::var_os("HOME") {
        Some(home) => vec![PathBuf::from(home).join(".condaplan").join("pkgs")],
        None => vec![std::env::temp_dir().join("condaplan").join("pkgs")],
    }
}
