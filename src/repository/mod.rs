// src/repository/mod.rs

//! Channel indices
//!
//! This module provides functionality for:
//! - Parsing channel strings into per-platform subdir URLs
//! - Fetching `repodata.json` with retry and conditional requests
//! - Caching subdir indices on disk with freshness tracking
//! - Loading channel lists into prioritized solver inputs

pub mod cache;
pub mod channel;
pub mod fetch;
pub mod loader;
pub mod repodata;

pub use cache::{
    CacheDecision, CacheEntry, CacheState, ChannelIndexCache, IndexForm, ResolveOptions, TtlPolicy,
};
pub use channel::{Channel, host_subdir, strip_credentials};
pub use fetch::{ConditionalHeaders, FetchOutcome, Fetcher, FreshIndex, HttpFetcher};
pub use loader::{
    ChannelIndexLoader, IndexEntry, IndexMetadata, Priority, PriorityMode, SubdirHandle,
    assign_priorities, load_channels,
};
pub use repodata::Repodata;
