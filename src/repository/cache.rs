// src/repository/cache.rs

//! Freshness-aware cache of subdir indices
//!
//! Every (channel, subdir) pair has one `CacheEntry` made of three files
//! sharing a base path:
//! - `<base>.json`: the index exactly as served
//! - `<base>.info.json`: validators (ETag, Last-Modified, Cache-Control) and
//!   the time the content was last confirmed fresh
//! - `<base>.packed.zst`: packed records regenerated from the JSON form
//!
//! Entries are memoized per credentialed URL for the lifetime of the
//! `ChannelIndexCache` that created them.

use crate::error::{Error, Result};
use crate::packages::PackageRecord;
use crate::repository::channel::strip_credentials;
use crate::repository::fetch::{ConditionalHeaders, FetchOutcome, Fetcher, FreshIndex};
use crate::repository::repodata::{Repodata, pack_records, unpack_records};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const JSON_SUFFIX: &str = ".json";
const STATE_SUFFIX: &str = ".info.json";
const NATIVE_SUFFIX: &str = ".packed.zst";

/// How long a cached index may be used without asking the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Fixed max-age
    Fixed(Duration),
    /// Max-age taken from the server's last `Cache-Control` header
    #[default]
    FromServer,
    /// Revalidate on every use
    AlwaysRevalidate,
}

impl TtlPolicy {
    /// Map a `local_repodata_ttl` setting: `> 1` fixed seconds, `1` server max-age, `<= 0` always revalidate
    pub fn from_seconds(ttl: i64) -> Self {
        match ttl {
            t if t > 1 => TtlPolicy::Fixed(Duration::from_secs(t as u64)),
            1 => TtlPolicy::FromServer,
            _ => TtlPolicy::AlwaysRevalidate,
        }
    }

    /// Effective max-age given the recorded `Cache-Control` header
    pub fn max_age(&self, cache_control: Option<&str>) -> Duration {
        match self {
            TtlPolicy::Fixed(max_age) => *max_age,
            TtlPolicy::FromServer => cache_control
                .and_then(parse_max_age)
                .map(Duration::from_secs)
                .unwrap_or(Duration::ZERO),
            TtlPolicy::AlwaysRevalidate => Duration::ZERO,
        }
    }
}

/// Extract `max-age=N` from a Cache-Control header
pub fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let (key, value) = directive.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("max-age") {
            value.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

/// Switches controlling one `resolve` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Use the cache if present, otherwise yield nothing; never touch the network
    pub offline: bool,
    /// Use the cache if present without any freshness check
    pub use_index_cache: bool,
    pub ttl: TtlPolicy,
}

/// What to do with a cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// The cached index is used without contacting the server
    UseCachedAsIs,
    /// Nothing usable is cached; fetch unconditionally
    FetchFresh,
    /// The cached index is stale; ask the server whether it changed
    Revalidate {
        etag: Option<String>,
        last_modified: Option<String>,
    },
    /// Offline with nothing cached: the subdir contributes no records
    Unavailable,
}

/// On-disk form to read an index from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexForm {
    Json,
    Native,
}

/// Contents of the `<base>.info.json` sidecar
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheState {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, rename = "mod", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    /// Unix time in milliseconds when the content was last confirmed fresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<u64>,
}

/// One channel subdir's cached index and its freshness metadata
#[derive(Debug)]
pub struct CacheEntry {
    key: String,
    url: String,
    cache_path_base: PathBuf,
    state: Mutex<CacheState>,
    content_changed: AtomicBool,
}

impl CacheEntry {
    /// Create an entry for `key` (a credentialed subdir URL) under `cache_dir`,
    /// picking up any sidecar state left by a previous process
    pub fn new(key: &str, cache_dir: &Path) -> Self {
        let url = strip_credentials(key);
        let cache_path_base = cache_dir.join(cache_file_stem(&url));
        let state_path = with_suffix(&cache_path_base, STATE_SUFFIX);
        let state = read_state(&state_path, &url).unwrap_or_else(|| CacheState {
            url: url.clone(),
            ..CacheState::default()
        });

        Self {
            key: key.to_string(),
            url,
            cache_path_base,
            state: Mutex::new(state),
            content_changed: AtomicBool::new(false),
        }
    }

    /// Credentialed URL this entry is memoized under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Credential-free subdir URL, safe to log
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn cache_path_base(&self) -> &Path {
        &self.cache_path_base
    }

    pub fn json_path(&self) -> PathBuf {
        with_suffix(&self.cache_path_base, JSON_SUFFIX)
    }

    pub fn native_path(&self) -> PathBuf {
        with_suffix(&self.cache_path_base, NATIVE_SUFFIX)
    }

    pub fn state_path(&self) -> PathBuf {
        with_suffix(&self.cache_path_base, STATE_SUFFIX)
    }

    /// Snapshot of the freshness state
    pub fn state(&self) -> CacheState {
        self.state.lock().clone()
    }

    pub fn etag(&self) -> Option<String> {
        self.state.lock().etag.clone()
    }

    pub fn last_modified(&self) -> Option<String> {
        self.state.lock().last_modified.clone()
    }

    pub fn cache_control(&self) -> Option<String> {
        self.state.lock().cache_control.clone()
    }

    /// Whether a fetch in this process rewrote the JSON form
    pub fn content_changed(&self) -> bool {
        self.content_changed.load(Ordering::SeqCst)
    }

    pub fn has_cached_json(&self) -> bool {
        self.json_path().is_file()
    }

    /// Time the cached content was last confirmed fresh
    ///
    /// Falls back to the JSON file's mtime when no sidecar records it.
    pub fn mtime(&self) -> Option<SystemTime> {
        let refreshed_at = self.state.lock().refreshed_at;
        match refreshed_at {
            Some(millis) => Some(UNIX_EPOCH + Duration::from_millis(millis)),
            None => modified(&self.json_path()),
        }
    }

    /// Age of the cached content at `now`; unknown ages are treated as infinitely old
    pub fn age(&self, now: SystemTime) -> Duration {
        match self.mtime() {
            Some(mtime) => now.duration_since(mtime).unwrap_or(Duration::ZERO),
            None => Duration::MAX,
        }
    }

    /// Which on-disk form to read
    ///
    /// The native form wins only if it exists, the JSON form was not
    /// rewritten in this process, and it is strictly newer than the JSON form.
    pub fn preferred_form(&self) -> IndexForm {
        let Some(native_mtime) = modified(&self.native_path()) else {
            return IndexForm::Json;
        };
        if self.content_changed() {
            return IndexForm::Json;
        }
        match modified(&self.json_path()) {
            Some(json_mtime) if native_mtime <= json_mtime => IndexForm::Json,
            _ => IndexForm::Native,
        }
    }

    /// Replace the cached JSON with freshly fetched content
    fn store(&self, fresh: FreshIndex, now: SystemTime) -> Result<()> {
        let dir = self.cache_dir();
        fs::create_dir_all(dir).map_err(|source| Error::CacheIo {
            path: dir.to_path_buf(),
            source,
        })?;

        write_atomic(&self.json_path(), &fresh.bytes)?;
        self.content_changed.store(true, Ordering::SeqCst);

        let state = CacheState {
            url: self.url.clone(),
            etag: fresh.etag,
            last_modified: fresh.last_modified,
            cache_control: fresh.cache_control,
            refreshed_at: Some(unix_millis(now)),
        };
        // The in-memory validators follow the JSON on disk even if the sidecar write fails
        let persisted = self.persist_state(&state);
        *self.state.lock() = state;
        persisted
    }

    /// Record that the server confirmed the cached content; the JSON file is left alone
    fn confirm_fresh(&self, now: SystemTime) -> Result<()> {
        let mut state = self.state();
        state.refreshed_at = Some(unix_millis(now));
        self.write_state(state)
    }

    fn write_state(&self, state: CacheState) -> Result<()> {
        self.persist_state(&state)?;
        *self.state.lock() = state;
        Ok(())
    }

    fn persist_state(&self, state: &CacheState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.state_path(), &bytes)
    }

    fn write_native(&self, records: &[PackageRecord]) -> Result<()> {
        let packed = pack_records(records)?;
        write_atomic(&self.native_path(), &packed)
    }

    fn cache_dir(&self) -> &Path {
        self.cache_path_base.parent().unwrap_or(Path::new("."))
    }
}

/// Memoizing owner of all cache entries below one cache directory
#[derive(Debug)]
pub struct ChannelIndexCache {
    cache_dir: PathBuf,
    entries: DashMap<String, Arc<CacheEntry>>,
}

impl ChannelIndexCache {
    /// Create a cache rooted at `cache_dir`; nothing is touched on disk yet
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            entries: DashMap::new(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Number of memoized entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the entry for a credentialed subdir URL, creating it on first use
    pub fn get_or_create(&self, key: &str) -> Arc<CacheEntry> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CacheEntry::new(key, &self.cache_dir)));
        Arc::clone(entry.value())
    }

    /// Decide what to do with `entry` at time `now`, without any I/O beyond stat calls
    pub fn decide(&self, entry: &CacheEntry, options: &ResolveOptions, now: SystemTime) -> CacheDecision {
        let cached = entry.has_cached_json();

        if options.offline {
            return if cached {
                CacheDecision::UseCachedAsIs
            } else {
                CacheDecision::Unavailable
            };
        }
        if !cached {
            return CacheDecision::FetchFresh;
        }
        if options.use_index_cache {
            return CacheDecision::UseCachedAsIs;
        }

        let max_age = options.ttl.max_age(entry.cache_control().as_deref());
        if entry.age(now) < max_age {
            CacheDecision::UseCachedAsIs
        } else {
            CacheDecision::Revalidate {
                etag: entry.etag(),
                last_modified: entry.last_modified(),
            }
        }
    }

    /// Bring `entry` up to date, fetching through `fetcher` when required
    ///
    /// Returns the decision that was finally taken: `UseCachedAsIs` (also after
    /// a not-modified answer or a cancelled fetch), `FetchFresh` when new
    /// content was written, or `Unavailable`.
    pub fn resolve(
        &self,
        entry: &CacheEntry,
        options: &ResolveOptions,
        fetcher: &dyn Fetcher,
    ) -> Result<CacheDecision> {
        let now = SystemTime::now();
        let decision = self.decide(entry, options, now);
        debug!("Cache decision for {}: {:?}", entry.url(), decision);

        let headers = match &decision {
            CacheDecision::UseCachedAsIs | CacheDecision::Unavailable => return Ok(decision),
            CacheDecision::FetchFresh => ConditionalHeaders::default(),
            CacheDecision::Revalidate {
                etag,
                last_modified,
            } => ConditionalHeaders {
                etag: etag.clone(),
                last_modified: last_modified.clone(),
            },
        };

        match fetcher.fetch(entry.key(), &headers) {
            FetchOutcome::Fresh(fresh) => {
                entry.store(fresh, now)?;
                info!("Refreshed index cache for {}", entry.url());
                Ok(CacheDecision::FetchFresh)
            }
            FetchOutcome::NotModified if entry.has_cached_json() => {
                if let Err(e) = entry.confirm_fresh(now) {
                    warn!("Could not record revalidation of {}: {}", entry.url(), e);
                }
                debug!("{} unchanged on server", entry.url());
                Ok(CacheDecision::UseCachedAsIs)
            }
            FetchOutcome::NotModified => Err(Error::IndexUnavailable {
                url: entry.url().to_string(),
                reason: "server reported not modified but nothing is cached".to_string(),
            }),
            FetchOutcome::Failed(reason) => Err(Error::IndexUnavailable {
                url: entry.url().to_string(),
                reason,
            }),
            FetchOutcome::Cancelled if entry.has_cached_json() => {
                debug!("Fetch of {} cancelled, keeping cached index", entry.url());
                Ok(CacheDecision::UseCachedAsIs)
            }
            FetchOutcome::Cancelled => Err(Error::IndexUnavailable {
                url: entry.url().to_string(),
                reason: "fetch cancelled".to_string(),
            }),
        }
    }

    /// Read the cached records of `entry`, stamping them with `channel` and `subdir`
    ///
    /// Reads the native form when it is preferred and regenerates it after a
    /// JSON read. A broken or unwritable native form is never fatal.
    pub fn load_records(&self, entry: &CacheEntry, channel: &str, subdir: &str) -> Result<Vec<PackageRecord>> {
        if entry.preferred_form() == IndexForm::Native {
            match fs::read(entry.native_path())
                .map_err(Error::from)
                .and_then(|bytes| unpack_records(&bytes))
            {
                Ok(records) => {
                    debug!("Loaded {} records from packed cache of {}", records.len(), entry.url());
                    return Ok(records);
                }
                Err(e) => warn!("Ignoring packed cache of {}: {}", entry.url(), e),
            }
        }

        let bytes = fs::read(entry.json_path())?;
        let records = Repodata::from_slice(&bytes)?.into_records(channel, subdir);
        if let Err(e) = entry.write_native(&records) {
            warn!("Could not write packed cache of {}: {}", entry.url(), e);
        }
        debug!("Loaded {} records from {}", records.len(), entry.url());
        Ok(records)
    }
}

/// Cache file stem for a credential-free subdir URL
pub fn cache_file_stem(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{:x}", digest)[..8].to_string()
}

/// Write `bytes` to a temporary file beside `path`, then rename it over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let cache_io = |source| Error::CacheIo {
        path: path.to_path_buf(),
        source,
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(cache_io)?;
    temp.write_all(bytes).map_err(cache_io)?;
    temp.persist(path).map_err(|e| cache_io(e.error))?;
    Ok(())
}

fn read_state(path: &Path, url: &str) -> Option<CacheState> {
    let bytes = fs::read(path).ok()?;
    match serde_json::from_slice::<CacheState>(&bytes) {
        Ok(state) if state.url == url => Some(state),
        Ok(_) => {
            warn!("Cache state {} belongs to another URL, ignoring", path.display());
            None
        }
        Err(e) => {
            warn!("Corrupt cache state {}: {}", path.display(), e);
            None
        }
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
