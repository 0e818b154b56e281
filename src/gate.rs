//! Promotion decision and the only code that writes run output.
//!
//! A run ends in one of two ways:
//!
//! - **Promote**: the merged snapshot differs from the baseline. The baseline
//!   file is atomically replaced and the same content becomes the latest-run
//!   output.
//! - **Stale**: nothing changed (including a run that fetched nothing). The
//!   baseline file is not opened for writing at all; the latest-run output
//!   gets a single [`Sentinel`] row.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::error::HarvestError;
use crate::models::{Sentinel, Snapshot};
use crate::reconcile::Reconciled;
use crate::store::{self, FileFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Promote,
    Stale,
}

/// Compare by key set and field values.
pub fn decide(previous: &Snapshot, merged: &Snapshot) -> Decision {
    if merged.same_content(previous) {
        Decision::Stale
    } else {
        Decision::Promote
    }
}

/// What the writer actually did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Outcome {
    Promoted { records: usize },
    Stale { generated_at: String },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Promoted { .. } => "promoted",
            Outcome::Stale { .. } => "stale",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Owns the baseline and latest-run paths for one run.
#[derive(Debug, Clone)]
pub struct DurableWriter {
    baseline: PathBuf,
    latest: PathBuf,
    format: FileFormat,
}

impl DurableWriter {
    pub fn new(baseline: impl Into<PathBuf>, latest: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            baseline: baseline.into(),
            latest: latest.into(),
            format,
        }
    }

    pub fn baseline(&self) -> &Path {
        &self.baseline
    }

    pub fn latest(&self) -> &Path {
        &self.latest
    }

    pub fn format(&self) -> &FileFormat {
        &self.format
    }

    /// Apply `decision` to disk. Nothing is written before the merged
    /// snapshot has rendered cleanly.
    #[instrument(level = "info", skip_all, fields(baseline = %self.baseline.display(), ?decision))]
    pub fn commit(&self, reconciled: &Reconciled, decision: Decision) -> Result<Outcome, HarvestError> {
        match decision {
            Decision::Promote => {
                let contents = store::render(&reconciled.merged, &self.format)?;
                store::write_atomic(&self.baseline, contents.as_bytes())?;
                store::write_atomic(&self.latest, contents.as_bytes())?;
                info!(
                    records = reconciled.merged.len(),
                    added = reconciled.changes.added.len(),
                    updated = reconciled.changes.updated.len(),
                    "Promoted merged snapshot to baseline"
                );
                Ok(Outcome::Promoted {
                    records: reconciled.merged.len(),
                })
            }
            Decision::Stale => {
                let sentinel = Sentinel::now();
                let contents = store::render_sentinel(&sentinel, &self.format);
                store::write_atomic(&self.latest, contents.as_bytes())?;
                info!(
                    latest = %self.latest.display(),
                    generated_at = %sentinel.timestamp(),
                    "No change; baseline left untouched"
                );
                Ok(Outcome::Stale {
                    generated_at: sentinel.timestamp(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Delimiter, Record, Schema, SENTINEL_KEY};
    use crate::reconcile::{MergeMode, Reconciler};
    use std::fs;
    use tempfile::tempdir;

    fn writer(dir: &Path) -> DurableWriter {
        DurableWriter::new(
            dir.join("baseline.csv"),
            dir.join("latest.csv"),
            FileFormat {
                schema: Schema::default(),
                delimiter: Delimiter::Comma,
                write_bom: false,
            },
        )
    }

    fn article(n: usize) -> Record {
        Record::new(format!("https://x/articles/{n}"))
            .with_field("Title", format!("Article {n}"))
            .with_field("Text", "body")
            .with_field("Category", "https://x/categories/1")
    }

    fn reconcile(previous: Snapshot, incoming: Vec<Record>) -> Reconciled {
        let mut r = Reconciler::new(previous, MergeMode::UpsertOnChange);
        for rec in incoming {
            r.fold(rec);
        }
        r.finish()
    }

    #[test]
    fn test_decide_is_field_level() {
        let a: Snapshot = [article(1)].into_iter().collect();
        let mut changed = article(1);
        changed.set("Text", "edited");
        let b: Snapshot = [changed].into_iter().collect();
        assert_eq!(decide(&a, &a.clone()), Decision::Stale);
        assert_eq!(decide(&a, &b), Decision::Promote);
    }

    #[test]
    fn test_empty_fetch_leaves_baseline_and_writes_sentinel() {
        let dir = tempdir().unwrap();
        let w = writer(dir.path());
        let previous: Snapshot = (1..=5).map(article).collect();
        store::save(&previous, w.baseline(), w.format()).unwrap();
        let before = fs::read(w.baseline()).unwrap();

        let reconciled = reconcile(previous, Vec::new());
        let decision = decide(&reconciled.previous, &reconciled.merged);
        assert_eq!(decision, Decision::Stale);
        let outcome = w.commit(&reconciled, decision).unwrap();
        assert_eq!(outcome.label(), "stale");

        assert_eq!(fs::read(w.baseline()).unwrap(), before);
        let latest = fs::read_to_string(w.latest()).unwrap();
        let rows: Vec<&str> = latest.lines().skip(1).collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].ends_with(SENTINEL_KEY));
    }

    #[test]
    fn test_change_promotes_baseline_and_latest() {
        let dir = tempdir().unwrap();
        let w = writer(dir.path());
        let previous: Snapshot = (1..=2).map(article).collect();
        store::save(&previous, w.baseline(), w.format()).unwrap();

        let reconciled = reconcile(previous, vec![article(3)]);
        let decision = decide(&reconciled.previous, &reconciled.merged);
        let outcome = w.commit(&reconciled, decision).unwrap();
        assert_eq!(outcome, Outcome::Promoted { records: 3 });

        let baseline = fs::read_to_string(w.baseline()).unwrap();
        assert_eq!(baseline, fs::read_to_string(w.latest()).unwrap());
        let reloaded = store::load(w.baseline(), w.format()).unwrap();
        assert_eq!(reloaded.snapshot, reconciled.merged);
    }

    #[test]
    fn test_first_run_with_nothing_fetched_creates_no_baseline() {
        let dir = tempdir().unwrap();
        let w = writer(dir.path());
        let reconciled = reconcile(Snapshot::new(), Vec::new());
        let decision = decide(&reconciled.previous, &reconciled.merged);
        w.commit(&reconciled, decision).unwrap();
        assert!(!w.baseline().exists());
        assert!(w.latest().exists());
    }
}
