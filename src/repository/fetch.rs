// src/repository/fetch.rs

//! Fetching subdir indices
//!
//! The index cache talks to the network only through the `Fetcher` trait.
//! `HttpFetcher` is the reqwest-backed implementation used by the binary.

use crate::error::{Error, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{
    CACHE_CONTROL, ETAG, HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed downloads
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// File name of a subdir index below its subdir URL
pub const REPODATA_FILE: &str = "repodata.json";

/// Validators sent along with a revalidation request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ConditionalHeaders {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A freshly downloaded index body plus its caching headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshIndex {
    pub bytes: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub cache_control: Option<String>,
}

/// Result of one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// New content
    Fresh(FreshIndex),
    /// The server confirmed the cached content is current (HTTP 304)
    NotModified,
    /// The fetch failed; retries, if any, are already exhausted
    Failed(String),
    /// The fetch was cancelled before completing
    Cancelled,
}

/// Source of subdir index documents
pub trait Fetcher: Send + Sync {
    /// Fetch the `repodata.json` located under `subdir_url`
    fn fetch(&self, subdir_url: &str, headers: &ConditionalHeaders) -> FetchOutcome;
}

/// HTTP fetcher with retry support
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    fn attempt(&self, url: &str, headers: &ConditionalHeaders) -> reqwest::Result<FetchOutcome> {
        let mut request = self.client.get(url);
        if let Some(etag) = &headers.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &headers.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = request.send()?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!("{} not modified", url);
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Ok(FetchOutcome::Failed(format!("HTTP {} from {}", status, url)));
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);
        let cache_control = header(CACHE_CONTROL);
        let bytes = response.bytes()?.to_vec();

        info!("Fetched {} ({} bytes)", url, bytes.len());
        Ok(FetchOutcome::Fresh(FreshIndex {
            bytes,
            etag,
            last_modified,
            cache_control,
        }))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, subdir_url: &str, headers: &ConditionalHeaders) -> FetchOutcome {
        let url = format!("{}/{}", subdir_url.trim_end_matches('/'), REPODATA_FILE);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&url, headers) {
                Ok(outcome) => return outcome,
                Err(e) => {
                    if attempt >= self.max_retries {
                        return FetchOutcome::Failed(format!(
                            "Failed to fetch {} after {} attempts: {}",
                            url, attempt, e
                        ));
                    }
                    warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}
