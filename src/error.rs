// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for condaplan
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// A cache directory or file could not be written. Callers may retry
    /// against the next writable cache root.
    #[error("Cache not writable at {}: {source}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every channel subdir failed to load
    #[error("No usable package index for channels: {}", channels.join(", "))]
    NoUsableIndex { channels: Vec<String> },

    /// A single subdir index could not be obtained
    #[error("Index unavailable for {url}: {reason}")]
    IndexUnavailable { url: String, reason: String },

    /// The solver asked to unlink something that is not installed
    #[error("Package {filename} is not installed in the target prefix")]
    MissingInstalledRecord { filename: String },

    /// A package to link came from a channel absent from the loaded index
    #[error("Cannot verify origin of {filename}: channel {channel} is not in the loaded index")]
    ReconcileLookup { channel: String, filename: String },

    /// Unparseable channel string
    #[error("Invalid channel '{0}'")]
    InvalidChannel(String),

    /// Unparseable package spec
    #[error("Invalid package spec '{0}'")]
    InvalidSpec(String),

    /// Malformed metadata
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Malformed configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Unsatisfiable request, carrying the solver's explanation verbatim
    #[error("{0}")]
    Solver(String),
}

/// Result type alias using condaplan's Error type
pub type Result<T> = std::result::Result<T, Error>;
