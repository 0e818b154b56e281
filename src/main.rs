//! # help_harvest
//!
//! Keeps a durable local copy of a help center's articles up to date. Each
//! run crawls the site, merges what it fetched into the previously saved
//! snapshot, and replaces that snapshot only when something actually changed.
//!
//! ## Usage
//!
//! ```sh
//! help_harvest run                 # one run
//! help_harvest serve               # POST /trigger-scrape runs one and returns the file
//! ```
//!
//! ## Architecture
//!
//! 1. **Load**: read the baseline snapshot (empty on first run)
//! 2. **Fetch**: discover article URLs and fetch them concurrently
//! 3. **Reconcile**: sanitize each record and fold it into the merge
//! 4. **Gate**: promote the merged snapshot, or mark the run stale
//!
//! Per-article failures are counted and skipped. Anything that would risk
//! the baseline (unreadable snapshot, unreachable source, failed write)
//! aborts the run before the baseline is touched.

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use help_harvest::cli::{Cli, Command};
use help_harvest::sources::HelpCenterSource;
use help_harvest::{config, pipeline, server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("help_harvest starting up");

    // Parse CLI, then layer it over the config file
    let args = Cli::parse();
    let mut config = config::load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    debug!(?config, "Effective configuration");

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            let source = HelpCenterSource::new(&config.source)?;
            let cancel = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Cannot listen for Ctrl-C; run is not cancellable");
                    std::future::pending::<()>().await;
                }
            };
            match pipeline::run_until(&config, &source, cancel).await {
                Ok(summary) => {
                    info!(summary = %serde_json::to_string(&summary)?, "Run summary");
                }
                Err(e) => {
                    error!(kind = e.kind(), error = %e, "Run failed; baseline left as it was");
                    return Err(e.into());
                }
            }
        }
        Command::Serve { .. } => {
            let runtime = tokio::runtime::Handle::current();
            tokio::task::spawn_blocking(move || server::serve(config, runtime)).await??;
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}
