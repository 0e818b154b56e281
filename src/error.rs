//! Error taxonomy for a harvest run.
//!
//! Errors come in two tiers:
//!
//! - **Per-record** errors ([`FetchError`], [`ParseError`]) are isolated,
//!   logged, and counted. They never abort a run.
//! - **Fatal** errors ([`HarvestError`]) abort the run before the baseline can
//!   be touched, and are reported to the HTTP trigger as a structured body.

use std::path::PathBuf;
use thiserror::Error;

/// A fatal condition that ends the run.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// A required path could not be read or written.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source could not be reached at all (e.g. the index page failed).
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A snapshot file exists but cannot be interpreted.
    #[error("unreadable snapshot {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    /// The writer was handed a value that would break the record boundary.
    #[error("record {key:?} has an unsanitized value in column {column:?}")]
    Unsanitized { key: String, column: String },

    /// Invalid configuration (bad selector, unknown key column, ...).
    #[error("configuration error: {0}")]
    Config(String),
}

impl HarvestError {
    /// Wrap an `io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarvestError::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable name, used in the trigger's error body.
    pub fn kind(&self) -> &'static str {
        match self {
            HarvestError::Io { .. } => "io_error",
            HarvestError::SourceUnavailable(_) => "source_unavailable",
            HarvestError::Format { .. } => "format_error",
            HarvestError::Unsanitized { .. } => "unsanitized_value",
            HarvestError::Config(_) => "config_error",
        }
    }
}

/// A single record could not be fetched. The run continues without it.
#[derive(Debug, Error)]
#[error("fetch failed for {key}: {reason}")]
pub struct FetchError {
    /// The key (locator) that was attempted.
    pub key: String,
    pub reason: String,
}

impl FetchError {
    pub fn new(key: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// A historical row that could not be loaded. It is skipped, not fatal.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    /// 1-based line number in the snapshot file.
    pub line: usize,
    pub reason: String,
}
