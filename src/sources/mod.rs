//! Record sources.
//!
//! A source follows the same two-phase pattern as any crawler:
//!
//! 1. **Discovery**: find the keys (article URLs) worth fetching
//! 2. **Fetching**: download and extract one raw record per key
//!
//! The run pipeline only iterates what a source hands back; it never calls
//! into the source for anything else.
//!
//! # Supported Sources
//!
//! | Source | Module | Method |
//! |--------|--------|--------|
//! | Help center | [`help_center`] | HTML crawl: index → categories → articles |

use crate::error::{FetchError, HarvestError};
use crate::models::Record;

pub mod help_center;

pub use help_center::HelpCenterSource;

/// A key to fetch, plus any fields already known from discovery
/// (for example the category page an article was linked from).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub key: String,
    pub carried: Vec<(String, String)>,
}

impl FetchTarget {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            carried: Vec::new(),
        }
    }

    pub fn carrying(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.carried.push((name.into(), value.into()));
        self
    }
}

/// Provider of raw (unsanitized) records.
pub trait Source {
    /// List everything to fetch. Failure here means the source is unreachable
    /// and is fatal for the run.
    async fn discover(&self) -> Result<Vec<FetchTarget>, HarvestError>;

    /// Fetch one record. Failures are per-record and never fatal.
    async fn fetch(&self, target: FetchTarget) -> Result<Record, FetchError>;
}
