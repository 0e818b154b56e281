//! Incremental snapshot harvesting.
//!
//! The engine behind the `help_harvest` binary: load the previous snapshot,
//! fold freshly fetched records into it, and durably promote the result only
//! when it changed.
//!
//! - [`sanitize`]: field normalization at ingestion
//! - [`store`]: atomic snapshot files
//! - [`reconcile`]: merge policies and change reports
//! - [`gate`]: promote-or-stale decision and the only writer of run output
//! - [`pipeline`]: the run state machine
//! - [`sources`]: where records come from
//! - [`server`]: the HTTP trigger

pub mod cli;
pub mod config;
pub mod error;
pub mod gate;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod sanitize;
pub mod server;
pub mod sources;
pub mod store;
pub mod utils;

pub use error::{FetchError, HarvestError, ParseError};
pub use models::{ChangeSet, Record, Sentinel, Snapshot};
pub use reconcile::{MergeMode, merge};
