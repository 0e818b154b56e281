//! Merging freshly fetched records into the previous snapshot.
//!
//! The [`Reconciler`] owns the merge for a whole run. Records are folded in
//! one at a time as they arrive, and [`Reconciler::finish`] can be called at
//! any point (including after a cancelled fetch) to obtain the merged
//! snapshot and its [`ChangeSet`]. The previous snapshot is kept intact for
//! the change gate to compare against.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::models::{ChangeSet, Record, Snapshot};

/// Policy for incoming records whose key is already known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMode {
    /// Known keys are never touched; the snapshot only grows.
    SkipExisting,
    /// Known keys are replaced when at least one field differs.
    #[default]
    UpsertOnChange,
}

/// What folding one record did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    Added,
    Updated,
    /// Known key with identical content.
    Unchanged,
    /// Known key discarded under [`MergeMode::SkipExisting`].
    Skipped,
}

/// Output of a reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub previous: Snapshot,
    pub merged: Snapshot,
    pub changes: ChangeSet,
}

#[derive(Debug)]
pub struct Reconciler {
    mode: MergeMode,
    previous: Snapshot,
    merged: Snapshot,
    changes: ChangeSet,
}

impl Reconciler {
    pub fn new(previous: Snapshot, mode: MergeMode) -> Self {
        Self {
            mode,
            merged: previous.clone(),
            previous,
            changes: ChangeSet::default(),
        }
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    pub fn previous(&self) -> &Snapshot {
        &self.previous
    }

    /// Fold one sanitized record into the in-progress merge.
    pub fn fold(&mut self, record: Record) -> Fold {
        let key = record.key.clone();
        let differs = self
            .merged
            .get(&key)
            .map(|current| record.differs_from(current));
        let outcome = match (self.mode, differs) {
            (_, None) => {
                self.merged.insert(record);
                self.changes.added.insert(key.clone());
                Fold::Added
            }
            (MergeMode::SkipExisting, Some(_)) => {
                self.changes.unchanged += 1;
                Fold::Skipped
            }
            (MergeMode::UpsertOnChange, Some(false)) => {
                self.changes.unchanged += 1;
                Fold::Unchanged
            }
            (MergeMode::UpsertOnChange, Some(true)) => {
                self.merged.insert(record);
                self.refresh_updated(&key);
                if self.changes.added.contains(&key) {
                    Fold::Added
                } else {
                    Fold::Updated
                }
            }
        };
        trace!(%key, ?outcome, "Folded record");
        outcome
    }

    /// A key is "updated" iff its merged record differs from the previous one,
    /// which a later duplicate in the same batch can undo.
    fn refresh_updated(&mut self, key: &str) {
        let (Some(before), Some(after)) = (self.previous.get(key), self.merged.get(key)) else {
            return;
        };
        if after.differs_from(before) {
            self.changes.updated.insert(key.to_string());
        } else {
            self.changes.updated.remove(key);
            // restore the previous bytes rather than an equivalent copy
            let before = before.clone();
            self.merged.insert(before);
        }
    }

    pub fn finish(self) -> Reconciled {
        Reconciled {
            previous: self.previous,
            merged: self.merged,
            changes: self.changes,
        }
    }
}

/// Merge a batch in one call.
pub fn merge<I>(previous: &Snapshot, incoming: I, mode: MergeMode) -> (Snapshot, ChangeSet)
where
    I: IntoIterator<Item = Record>,
{
    let mut reconciler = Reconciler::new(previous.clone(), mode);
    for record in incoming {
        reconciler.fold(record);
    }
    let Reconciled {
        merged, changes, ..
    } = reconciler.finish();
    (merged, changes)
}
