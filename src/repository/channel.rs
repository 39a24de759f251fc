// src/repository/channel.rs

//! Channel strings and their per-platform subdir URLs
//!
//! A channel can be given as a bare name resolved against the channel alias
//! (`conda-forge`), a full URL, or a local path. Credentials and `/t/<token>`
//! segments are split off so they never take part in channel identity.

use crate::error::{Error, Result};
use std::fmt;
use std::path::Path;
use url::Url;

/// Platform subdirs a channel URL may end with
pub const KNOWN_SUBDIRS: &[&str] = &[
    "noarch",
    "emscripten-wasm32",
    "wasi-wasm32",
    "linux-32",
    "linux-64",
    "linux-aarch64",
    "linux-armv6l",
    "linux-armv7l",
    "linux-ppc64",
    "linux-ppc64le",
    "linux-riscv64",
    "linux-s390x",
    "osx-64",
    "osx-arm64",
    "win-32",
    "win-64",
    "win-arm64",
    "zos-z",
];

/// The subdir of the running host
pub fn host_subdir() -> &'static str {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86_64") => "linux-64",
        ("linux", "x86") => "linux-32",
        ("linux", "aarch64") => "linux-aarch64",
        ("linux", "powerpc64") => "linux-ppc64le",
        ("linux", "s390x") => "linux-s390x",
        ("macos", "aarch64") => "osx-arm64",
        ("macos", _) => "osx-64",
        ("windows", "aarch64") => "win-arm64",
        ("windows", "x86") => "win-32",
        ("windows", _) => "win-64",
        _ => "noarch",
    }
}

/// A parsed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    canonical_name: String,
    base_url: Url,
    auth: Option<String>,
    token: Option<String>,
    platform: Option<String>,
}

impl Channel {
    /// Parse a channel string, resolving bare names against `channel_alias`
    pub fn parse(value: &str, channel_alias: &Url) -> Result<Self> {
        let value = value.trim().trim_end_matches('/');
        if value.is_empty() {
            return Err(Error::InvalidChannel(value.to_string()));
        }

        if value.contains("://") {
            let url = Url::parse(value).map_err(|_| Error::InvalidChannel(value.to_string()))?;
            return Self::from_url(url, channel_alias);
        }

        if Path::new(value).is_absolute() {
            let url = Url::from_file_path(value).map_err(|_| Error::InvalidChannel(value.to_string()))?;
            return Self::from_url(url, channel_alias);
        }

        let (name, platform) = split_platform(value);
        let alias = channel_alias.as_str().trim_end_matches('/');
        let base_url = Url::parse(&format!("{}/{}", alias, name))
            .map_err(|_| Error::InvalidChannel(value.to_string()))?;

        Ok(Self {
            canonical_name: name.to_string(),
            base_url,
            auth: None,
            token: None,
            platform: platform.map(str::to_string),
        })
    }

    fn from_url(mut url: Url, channel_alias: &Url) -> Result<Self> {
        let auth = match (url.username(), url.password()) {
            ("", None) => None,
            (user, Some(password)) => Some(format!("{}:{}", user, password)),
            (user, None) => Some(user.to_string()),
        };
        // Only fails for cannot-be-a-base URLs, which never carry credentials
        let _ = url.set_username("");
        let _ = url.set_password(None);

        let mut segments: Vec<String> = url
            .path_segments()
            .map(|segs| segs.filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();

        let token = take_token(&mut segments);
        let platform = match segments.last() {
            Some(last) if KNOWN_SUBDIRS.contains(&last.as_str()) => segments.pop(),
            _ => None,
        };
        url.set_path(&segments.join("/"));

        let clean = url.as_str().trim_end_matches('/').to_string();
        let alias = channel_alias.as_str().trim_end_matches('/');
        let canonical_name = match clean.strip_prefix(alias) {
            Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
            _ => clean,
        };

        Ok(Self {
            canonical_name,
            base_url: url,
            auth,
            token,
            platform,
        })
    }

    /// Name used for channel identity and strict priority
    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    /// Credential-free base URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Platform this channel string was pinned to, if any
    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    /// Subdirs to load for `target`: the target (or pinned) platform, then `noarch`
    pub fn subdirs(&self, target: &str) -> Vec<String> {
        let platform = self.platform.as_deref().unwrap_or(target);
        if platform == "noarch" {
            vec!["noarch".to_string()]
        } else {
            vec![platform.to_string(), "noarch".to_string()]
        }
    }

    /// Credential-free URL of one subdir
    pub fn subdir_url(&self, subdir: &str) -> String {
        format!("{}/{}", self.base_url(), subdir)
    }

    /// Subdir URL including credentials and token; the cache memoization key
    pub fn credentialed_subdir_url(&self, subdir: &str) -> String {
        let mut url = self.base_url.clone();
        if let Some(auth) = &self.auth {
            let (user, password) = match auth.split_once(':') {
                Some((user, password)) => (user, Some(password)),
                None => (auth.as_str(), None),
            };
            let _ = url.set_username(user);
            let _ = url.set_password(password);
        }
        let base = url.as_str().trim_end_matches('/').to_string();
        match &self.token {
            Some(token) => {
                // Token goes right after the host: scheme://host/t/<token>/path
                let path = self.base_url.path().trim_matches('/');
                let origin = base
                    .strip_suffix(path)
                    .unwrap_or(&base)
                    .trim_end_matches('/');
                if path.is_empty() {
                    format!("{}/t/{}/{}", origin, token, subdir)
                } else {
                    format!("{}/t/{}/{}/{}", origin, token, path, subdir)
                }
            }
            None => format!("{}/{}", base, subdir),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name)
    }
}

/// Remove credentials and any `/t/<token>` segment from a URL
///
/// Strings that are not URLs are returned trimmed of trailing slashes.
pub fn strip_credentials(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    let _ = url.set_username("");
    let _ = url.set_password(None);
    if let Some(segs) = url.path_segments() {
        let mut segments: Vec<String> = segs.filter(|s| !s.is_empty()).map(str::to_string).collect();
        if take_token(&mut segments).is_some() {
            url.set_path(&segments.join("/"));
        }
    }
    url.as_str().trim_end_matches('/').to_string()
}

fn take_token(segments: &mut Vec<String>) -> Option<String> {
    let pos = segments.iter().position(|s| s == "t")?;
    if pos + 1 >= segments.len() {
        return None;
    }
    let token = segments.remove(pos + 1);
    segments.remove(pos);
    Some(token)
}

fn split_platform(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('/') {
        Some((rest, last)) if KNOWN_SUBDIRS.contains(&last) => (rest, Some(last)),
        _ => (name, None),
    }
}
