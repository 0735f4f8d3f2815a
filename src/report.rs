//! Run accounting.
//!
//! [`RunReport`] collects counts and errors for one invocation and never
//! fails. Per-worker reports can be combined with [`RunReport::merge`].
//! [`RunReport::finish`] freezes everything into a [`RunSummary`] for
//! printing or JSON output.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{CatalogError, ErrorKind};
use crate::metadata_sync::TagOutcome;
use crate::reconcile::Decision;

/// Whole-run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Walking,
    Reconciling,
    SyncingTags,
    Reporting,
    Done,
    Aborted,
}

impl RunPhase {
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Walking)
                | (Walking, Reconciling)
                | (Walking, Aborted)
                | (Reconciling, SyncingTags)
                | (SyncingTags, Reporting)
                | (Reporting, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Aborted)
    }
}

/// A non-fatal error kept for operator follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedError {
    pub kind: ErrorKind,
    pub path: Option<PathBuf>,
    pub key: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub clips_inserted: u64,
    pub clips_updated: u64,
    pub clips_deleted: u64,
    pub clips_unchanged: u64,
    pub deletions_deferred: u64,
    pub tags_upserted: u64,
    pub tags_removed: u64,
    pub tags_unchanged: u64,
    pub files_skipped: u64,
    pub dirs_visited: u64,
}

impl RunCounts {
    fn add(&mut self, other: &RunCounts) {
        self.clips_inserted += other.clips_inserted;
        self.clips_updated += other.clips_updated;
        self.clips_deleted += other.clips_deleted;
        self.clips_unchanged += other.clips_unchanged;
        self.deletions_deferred += other.deletions_deferred;
        self.tags_upserted += other.tags_upserted;
        self.tags_removed += other.tags_removed;
        self.tags_unchanged += other.tags_unchanged;
        self.files_skipped += other.files_skipped;
        self.dirs_visited += other.dirs_visited;
    }

    /// Catalog writes these counts stand for.
    pub fn writes(&self) -> u64 {
        self.clips_inserted
            + self.clips_updated
            + self.clips_deleted
            + self.tags_upserted
            + self.tags_removed
    }
}

/// Mutable accumulator for one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    root: PathBuf,
    dry_run: bool,
    phase: RunPhase,
    started_at: DateTime<Utc>,
    counts: RunCounts,
    errors: Vec<RecordedError>,
}

impl RunReport {
    pub fn new(root: &Path, dry_run: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            dry_run,
            phase: RunPhase::Idle,
            started_at: Utc::now(),
            counts: RunCounts::default(),
            errors: Vec::new(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn counts(&self) -> &RunCounts {
        &self.counts
    }

    pub fn errors(&self) -> &[RecordedError] {
        &self.errors
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn enter(&mut self, next: RunPhase) -> bool {
        if self.phase.can_advance_to(next) {
            tracing::debug!(from = ?self.phase, to = ?next, "run phase");
            self.phase = next;
            true
        } else {
            tracing::warn!(from = ?self.phase, to = ?next, "ignoring illegal run phase transition");
            false
        }
    }

    /// Count a decision whose write succeeded (or, in a dry run, would be made).
    pub fn record_decision(&mut self, decision: &Decision) {
        match decision {
            Decision::Insert(_) => self.counts.clips_inserted += 1,
            Decision::UpdateFormats { .. } => self.counts.clips_updated += 1,
            Decision::NoChange { .. } => self.counts.clips_unchanged += 1,
            Decision::Delete(_) => self.counts.clips_deleted += 1,
        }
    }

    pub fn record_tag(&mut self, outcome: TagOutcome) {
        match outcome {
            TagOutcome::Upserted => self.counts.tags_upserted += 1,
            TagOutcome::Removed => self.counts.tags_removed += 1,
            TagOutcome::Unchanged => self.counts.tags_unchanged += 1,
            TagOutcome::NoTags => {}
        }
    }

    pub fn record_deferred(&mut self, count: usize) {
        self.counts.deletions_deferred += count as u64;
    }

    pub fn record_skipped(&mut self, path: &Path) {
        tracing::trace!(file = %path.display(), "unsupported extension");
        self.counts.files_skipped += 1;
    }

    pub fn record_dirs_visited(&mut self, dirs: u64) {
        self.counts.dirs_visited += dirs;
    }

    pub fn record_error(&mut self, err: &CatalogError, key: Option<&str>) {
        tracing::warn!(kind = %err.kind(), key = ?key, "{}", err);
        let key = match err {
            CatalogError::Write { key, .. } => Some(key.clone()),
            _ => key.map(str::to_string),
        };
        let message = match err {
            CatalogError::FatalRoot { reason, .. } => reason.clone(),
            CatalogError::Path { message, .. }
            | CatalogError::Extraction { message, .. }
            | CatalogError::Write { message, .. } => message.clone(),
        };
        self.errors.push(RecordedError {
            kind: err.kind(),
            path: err.path().cloned(),
            key,
            message,
        });
    }

    /// Fold another report (e.g. from a worker) into this one.
    pub fn merge(&mut self, other: RunReport) {
        self.counts.add(&other.counts);
        self.errors.extend(other.errors);
        if other.started_at < self.started_at {
            self.started_at = other.started_at;
        }
    }

    /// Freeze the report. An aborted run stays aborted; anything else is done.
    pub fn finish(mut self) -> RunSummary {
        if self.phase != RunPhase::Aborted && self.phase != RunPhase::Done {
            if self.phase != RunPhase::Reporting {
                tracing::warn!(phase = ?self.phase, "finishing a run before the reporting phase");
            }
            self.phase = RunPhase::Done;
        }
        RunSummary {
            root: self.root,
            dry_run: self.dry_run,
            phase: self.phase,
            started_at: self.started_at,
            finished_at: Utc::now(),
            counts: self.counts,
            errors: self.errors,
        }
    }
}

/// Immutable outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub root: PathBuf,
    pub dry_run: bool,
    pub phase: RunPhase,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: RunCounts,
    pub errors: Vec<RecordedError>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn print_human(&self) {
        let c = &self.counts;
        let verb = if self.dry_run { "pending" } else { "" };
        let label = |name: &str| {
            if verb.is_empty() {
                name.to_string()
            } else {
                format!("{} ({})", name, verb)
            }
        };

        if self.dry_run {
            println!("scan {} (dry-run)", self.root.display());
        } else {
            println!("scan {}", self.root.display());
        }
        println!("  directories: {}", c.dirs_visited);
        println!("  skipped files: {}", c.files_skipped);
        println!("  {}: {}", label("clips inserted"), c.clips_inserted);
        println!("  {}: {}", label("clips updated"), c.clips_updated);
        println!("  {}: {}", label("clips deleted"), c.clips_deleted);
        println!("  clips unchanged: {}", c.clips_unchanged);
        if c.deletions_deferred > 0 {
            println!("  deletions deferred: {}", c.deletions_deferred);
        }
        println!("  {}: {}", label("tags upserted"), c.tags_upserted);
        println!("  {}: {}", label("tags removed"), c.tags_removed);
        println!("  tags unchanged: {}", c.tags_unchanged);
        println!("  errors: {}", self.errors.len());
        for e in &self.errors {
            let location = e
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .or_else(|| e.key.clone())
                .unwrap_or_default();
            println!("    [{}] {}: {}", e.kind, location, e.message);
        }
        println!("ok");
    }
}
