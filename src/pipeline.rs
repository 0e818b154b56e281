//! One harvest run, start to finish.
//!
//! ```text
//! INIT → LOAD_PREVIOUS → FETCH ⇄ SANITIZE → RECONCILE → COMPARE → PROMOTE | STALE → DONE
//! ```
//!
//! Fetching runs on a bounded pool (`workers` requests in flight), but every
//! completed fetch is handed back to this single task, which sanitizes it
//! and folds it into the [`Reconciler`]. Nothing else touches the snapshot
//! or the output files.
//!
//! A run can be cancelled. Cancellation stops fetching and the run is
//! finalized with whatever was folded so far.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::gate::{self, DurableWriter, Outcome};
use crate::models::ChangeSet;
use crate::reconcile::{MergeMode, Reconciler};
use crate::sanitize::Sanitizer;
use crate::sources::Source;
use crate::store;
use crate::utils::ensure_writable_dir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    LoadPrevious,
    Fetch,
    Sanitize,
    Reconcile,
    Compare,
    Promote,
    Stale,
    Done,
    Failed,
}

impl RunState {
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Init, LoadPrevious)
                | (LoadPrevious, Fetch)
                | (LoadPrevious, Failed)
                | (Fetch, Sanitize)
                | (Fetch, Compare)
                | (Fetch, Failed)
                | (Sanitize, Reconcile)
                | (Reconcile, Fetch)
                | (Reconcile, Compare)
                | (Compare, Promote)
                | (Compare, Stale)
                | (Promote, Done)
                | (Promote, Failed)
                | (Stale, Done)
                | (Stale, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "INIT",
            RunState::LoadPrevious => "LOAD_PREVIOUS",
            RunState::Fetch => "FETCH",
            RunState::Sanitize => "SANITIZE",
            RunState::Reconcile => "RECONCILE",
            RunState::Compare => "COMPARE",
            RunState::Promote => "PROMOTE",
            RunState::Stale => "STALE",
            RunState::Done => "DONE",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Tracks the current state and refuses illegal transitions.
#[derive(Debug)]
struct Machine {
    state: RunState,
}

impl Machine {
    fn new() -> Self {
        Self {
            state: RunState::Init,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal run transition {} -> {}",
            self.state,
            next
        );
        trace!(from = %self.state, to = %next, "Run state");
        self.state = next;
    }

    /// Move to FAILED and hand the error back for `?`.
    fn fail(&mut self, err: HarvestError) -> HarvestError {
        error!(state = %self.state, kind = err.kind(), error = %err, "Run failed");
        self.advance(RunState::Failed);
        err
    }
}

/// End-of-run report. Per-record problems only ever show up here as counts.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    #[serde(flatten)]
    pub outcome: Outcome,
    pub mode: MergeMode,
    /// Records fetched successfully.
    pub fetched: usize,
    /// Targets not fetched or records dropped (known keys, empty keys).
    pub skipped: usize,
    /// Fetch attempts that failed.
    pub failed: usize,
    /// Historical rows dropped while loading the previous snapshot.
    pub malformed_rows: usize,
    pub cancelled: bool,
    pub changes: ChangeSet,
    pub elapsed_ms: u128,
}

/// Run one harvest. Never cancelled.
pub async fn run<S: Source>(config: &HarvestConfig, source: &S) -> Result<RunSummary, HarvestError> {
    run_until(config, source, std::future::pending::<()>()).await
}

/// Run one harvest, finalizing early if `cancel` completes first.
#[instrument(level = "info", skip_all, fields(mode = ?config.mode, output_dir = %config.output_dir.display()))]
pub async fn run_until<S, C>(
    config: &HarvestConfig,
    source: &S,
    cancel: C,
) -> Result<RunSummary, HarvestError>
where
    S: Source,
    C: Future<Output = ()>,
{
    let started = Instant::now();
    let mut machine = Machine::new();
    config.validate()?;
    let format = config.file_format()?;
    let sanitizer = Sanitizer::new(config.delimiter);
    let writer = DurableWriter::new(config.baseline_path(), config.latest_path(), format);

    // ---- LOAD_PREVIOUS ----
    machine.advance(RunState::LoadPrevious);
    if let Err(e) = ensure_writable_dir(&config.output_dir).await {
        return Err(machine.fail(e));
    }
    let loaded = store::load(writer.baseline(), writer.format()).map_err(|e| machine.fail(e))?;
    let malformed_rows = loaded.skipped.len();
    let mut reconciler = Reconciler::new(loaded.snapshot, config.mode);

    // ---- FETCH ----
    machine.advance(RunState::Fetch);
    let targets = source.discover().await.map_err(|e| machine.fail(e))?;
    let discovered = targets.len();
    let mut skipped = 0usize;
    let targets: Vec<_> = match config.mode {
        // known keys would be discarded anyway; don't spend a request on them
        MergeMode::SkipExisting => targets
            .into_iter()
            .filter(|t| {
                let known = reconciler.previous().contains_key(&sanitizer.clean(&t.key));
                if known {
                    skipped += 1;
                }
                !known
            })
            .collect(),
        MergeMode::UpsertOnChange => targets,
    };
    info!(
        discovered,
        to_fetch = targets.len(),
        skipped_known = skipped,
        workers = config.workers,
        "Starting fetch"
    );

    let mut fetched = 0usize;
    let mut failed = 0usize;
    let mut cancelled = false;
    let mut outcomes = stream::iter(targets)
        .map(|target| source.fetch(target))
        .buffer_unordered(config.workers);
    let mut cancel = std::pin::pin!(cancel);

    loop {
        let next = tokio::select! {
            biased;
            _ = &mut cancel => {
                cancelled = true;
                warn!(fetched, failed, "Run cancelled; finalizing what was collected");
                break;
            }
            next = outcomes.next() => next,
        };
        let Some(outcome) = next else { break };

        match outcome {
            Ok(raw) => {
                fetched += 1;
                machine.advance(RunState::Sanitize);
                let record = writer.format().schema.project(sanitizer.sanitize(raw));
                if record.key.is_empty() {
                    warn!("Fetched record has an empty key after sanitizing; dropping");
                    skipped += 1;
                    machine.advance(RunState::Reconcile);
                } else {
                    machine.advance(RunState::Reconcile);
                    let fold = reconciler.fold(record);
                    debug!(?fold, fetched, "Folded fetched record");
                }
                machine.advance(RunState::Fetch);
            }
            Err(e) => {
                failed += 1;
                warn!(key = %e.key, reason = %e.reason, "Fetch failed; continuing");
            }
        }
    }
    drop(outcomes);

    // ---- COMPARE ----
    machine.advance(RunState::Compare);
    let reconciled = reconciler.finish();
    let decision = gate::decide(&reconciled.previous, &reconciled.merged);
    machine.advance(match decision {
        gate::Decision::Promote => RunState::Promote,
        gate::Decision::Stale => RunState::Stale,
    });

    let outcome = writer
        .commit(&reconciled, decision)
        .map_err(|e| machine.fail(e))?;
    machine.advance(RunState::Done);
    debug_assert!(machine.state.is_terminal());

    let summary = RunSummary {
        outcome,
        mode: config.mode,
        fetched,
        skipped,
        failed,
        malformed_rows,
        cancelled,
        changes: reconciled.changes,
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!(
        outcome = %summary.outcome,
        fetched = summary.fetched,
        skipped = summary.skipped,
        failed = summary.failed,
        added = summary.changes.added.len(),
        updated = summary.changes.updated.len(),
        unchanged = summary.changes.unchanged,
        cancelled = summary.cancelled,
        elapsed_ms = summary.elapsed_ms as u64,
        "Run complete"
    );
    Ok(summary)
}
