//! Command-line interface definitions for help_harvest.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Most options can also be given through environment variables, and all of
//! them override the YAML config file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::HarvestConfig;
use crate::models::Delimiter;
use crate::reconcile::MergeMode;

/// Command-line arguments for help_harvest.
///
/// # Examples
///
/// ```sh
/// # One run with defaults (upsert-on-change, ./output)
/// help_harvest
///
/// # Grow-only run into a different directory
/// help_harvest --mode skip-existing -o /var/lib/harvest run
///
/// # HTTP trigger
/// help_harvest --config harvest.yaml serve --addr 127.0.0.1:8080
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long, env = "HARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for the baseline and latest-run files
    #[arg(short, long, env = "HARVEST_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// How to treat records whose key is already in the baseline
    #[arg(long, value_enum, env = "HARVEST_MODE")]
    pub mode: Option<MergeMode>,

    /// Column delimiter of the snapshot files
    #[arg(long, value_enum)]
    pub delimiter: Option<Delimiter>,

    /// Maximum concurrent fetches
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Help-center landing page to crawl
    #[arg(long, env = "HARVEST_BASE_URL")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Perform a single harvest run (default)
    Run,
    /// Serve the HTTP trigger
    Serve {
        /// Listen address, e.g. 0.0.0.0:8080
        #[arg(long)]
        addr: Option<String>,
    },
}

impl Cli {
    /// Overlay flags that were given onto `config`.
    pub fn apply(&self, config: &mut HarvestConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(delimiter) = self.delimiter {
            config.delimiter = delimiter;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(url) = &self.base_url {
            config.source.base_url = url.clone();
        }
        if let Some(Command::Serve { addr: Some(addr) }) = &self.command {
            config.server.addr = addr.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::parse_from(["help_harvest"]);
        assert_eq!(cli.command, None);
        let mut config = HarvestConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.mode, MergeMode::UpsertOnChange);
    }

    #[test]
    fn test_cli_flags_override_config() {
        let cli = Cli::parse_from([
            "help_harvest",
            "--mode",
            "skip-existing",
            "-o",
            "/tmp/harvest",
            "--delimiter",
            "pipe",
            "-w",
            "8",
            "serve",
            "--addr",
            "127.0.0.1:9000",
        ]);
        let mut config = HarvestConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.mode, MergeMode::SkipExisting);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/harvest"));
        assert_eq!(config.delimiter, Delimiter::Pipe);
        assert_eq!(config.workers, 8);
        assert_eq!(config.server.addr, "127.0.0.1:9000");
    }
}
