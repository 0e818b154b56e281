//! Runtime configuration.
//!
//! Settings come from an optional YAML file (`--config`), then individual
//! command-line flags override file values. Every field has a default, so a
//! config file may set only what it needs:
//!
//! ```yaml
//! output_dir: ./output
//! mode: skip-existing
//! source:
//!   base_url: https://slack.com/intl/zh-tw/help
//!   body_selector: div.article_body
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::error::HarvestError;
use crate::models::{Delimiter, Schema};
use crate::reconcile::MergeMode;
use crate::store::FileFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Directory holding the baseline and latest-run files.
    pub output_dir: PathBuf,
    /// Baseline snapshot file name inside `output_dir`.
    pub baseline_file: String,
    /// Latest-run output file name inside `output_dir`.
    pub latest_file: String,
    pub mode: MergeMode,
    pub delimiter: Delimiter,
    /// Prefix files with a UTF-8 byte order mark for spreadsheet consumers.
    pub write_bom: bool,
    /// Column names in header order.
    pub columns: Vec<String>,
    pub key_column: String,
    /// Maximum fetches in flight at once.
    pub workers: usize,
    pub source: SourceConfig,
    pub server: ServerConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        let schema = Schema::default();
        Self {
            output_dir: PathBuf::from("output"),
            baseline_file: "slack_articles_with_category.csv".to_string(),
            latest_file: "latest_run.csv".to_string(),
            mode: MergeMode::default(),
            delimiter: Delimiter::default(),
            write_bom: true,
            columns: schema.columns().to_vec(),
            key_column: schema.key_column().to_string(),
            workers: 4,
            source: SourceConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Where and how the help-center source crawls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub category_link_selector: String,
    pub article_link_selector: String,
    pub title_selector: String,
    pub body_selector: String,
    /// Category value used when discovery did not record one.
    pub default_category: String,
    pub request_timeout_secs: u64,
    /// Pause between category page requests.
    pub pause_ms: u64,
    /// Upper bound of the random jitter added to `pause_ms`.
    pub jitter_ms: u64,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://slack.com/intl/zh-tw/help".to_string(),
            category_link_selector: "a[href*='/help/categories/']".to_string(),
            article_link_selector: "a[href*='/help/articles/']".to_string(),
            title_selector: "title".to_string(),
            body_selector: "div.article_body".to_string(),
            default_category: "unknown".to_string(),
            request_timeout_secs: 60,
            pause_ms: 1000,
            jitter_ms: 250,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl HarvestConfig {
    pub fn baseline_path(&self) -> PathBuf {
        self.output_dir.join(&self.baseline_file)
    }

    pub fn latest_path(&self) -> PathBuf {
        self.output_dir.join(&self.latest_file)
    }

    /// Validated on-disk format.
    pub fn file_format(&self) -> Result<FileFormat, HarvestError> {
        let schema = Schema::new(self.columns.clone(), self.key_column.clone())?;
        if let Some(column) = schema.columns_containing(self.delimiter).next() {
            return Err(HarvestError::Config(format!(
                "column name {column:?} contains the {:?} delimiter",
                self.delimiter.as_char()
            )));
        }
        Ok(FileFormat {
            schema,
            delimiter: self.delimiter,
            write_bom: self.write_bom,
        })
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        self.file_format()?;
        if self.workers == 0 {
            return Err(HarvestError::Config("workers must be at least 1".to_string()));
        }
        if self.baseline_file == self.latest_file {
            return Err(HarvestError::Config(
                "baseline_file and latest_file must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from `path`, or defaults when no path is given.
#[instrument(level = "info")]
pub fn load_config(path: Option<&Path>) -> Result<HarvestConfig, HarvestError> {
    let Some(path) = path else {
        return Ok(HarvestConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
    let config = parse_config(&text)?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

pub fn parse_config(text: &str) -> Result<HarvestConfig, HarvestError> {
    serde_yaml::from_str(text).map_err(|e| HarvestError::Config(e.to_string()))
}
