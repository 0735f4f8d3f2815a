//! Catalog reconciliation.
//!
//! [`Reconciler`] diffs groups from the walk against the catalog snapshot.
//! Each key gets exactly one [`Decision`]. Deletions are only produced by
//! [`Reconciler::finish`], which needs the coverage of a completed walk, so
//! a failed mount or an unreadable directory never empties the catalog.
//!
//! [`apply_decision`] turns a decision into its single catalog write, with
//! bounded retry and exponential backoff.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::CatalogError;
use crate::grouper::WalkCoverage;
use crate::models::{Clip, ClipGroup, ClipKey};
use crate::store::{CatalogSnapshot, CatalogStore};

/// What to do with one clip key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// On disk, absent from the catalog.
    Insert(ClipGroup),
    /// On disk and cataloged, but the format flags differ.
    UpdateFormats { clip: Clip, group: ClipGroup },
    /// On disk and cataloged with matching flags.
    NoChange { clip: Clip, group: ClipGroup },
    /// Cataloged, and the completed walk saw no file for it.
    Delete(Clip),
}

impl Decision {
    pub fn key(&self) -> &str {
        match self {
            Decision::Insert(group) => &group.key,
            Decision::UpdateFormats { clip, .. }
            | Decision::NoChange { clip, .. }
            | Decision::Delete(clip) => &clip.key,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Decision::NoChange { .. })
    }

    /// Whether tags must be (re)extracted once this decision is applied.
    ///
    /// New clips always need tags. A format change only matters when it moves
    /// the canonical source file. Everything on disk is re-read on a rescan.
    pub fn needs_tag_sync(&self, rescan_tags: bool) -> bool {
        match self {
            Decision::Insert(_) => true,
            Decision::UpdateFormats { clip, group } => {
                rescan_tags || clip.formats.canonical() != group.formats.canonical()
            }
            Decision::NoChange { .. } => rescan_tags,
            Decision::Delete(_) => false,
        }
    }

    /// The on-disk group, for decisions about clips that still exist.
    pub fn group(&self) -> Option<&ClipGroup> {
        match self {
            Decision::Insert(group)
            | Decision::UpdateFormats { group, .. }
            | Decision::NoChange { group, .. } => Some(group),
            Decision::Delete(_) => None,
        }
    }
}

/// Result of closing a reconciliation pass.
#[derive(Debug, Default)]
pub struct Finish {
    pub deletes: Vec<Decision>,
    /// Unseen clips under directories the walk could not fully read.
    pub deferred: Vec<Clip>,
}

/// Diffs disk groups against a catalog snapshot taken at the start of a run.
pub struct Reconciler {
    unseen: HashMap<ClipKey, Clip>,
}

impl Reconciler {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            unseen: snapshot.into_map(),
        }
    }

    pub fn decide(&mut self, group: ClipGroup) -> Decision {
        let decision = match self.unseen.remove(&group.clip_key()) {
            None => Decision::Insert(group),
            Some(clip) if clip.formats == group.formats => Decision::NoChange { clip, group },
            Some(clip) => Decision::UpdateFormats { clip, group },
        };
        tracing::debug!(key = decision.key(), ?decision, "reconciled");
        decision
    }

    /// Close the pass after the walk is exhausted. Every clip the walk did
    /// not see becomes a delete if its parent was fully observed.
    pub fn finish(self, coverage: &WalkCoverage) -> Finish {
        let mut finish = Finish::default();
        let mut unseen: Vec<Clip> = self.unseen.into_values().collect();
        unseen.sort_by(|a, b| a.key.cmp(&b.key));

        for clip in unseen {
            if coverage.covers(&clip.parent) {
                finish.deletes.push(Decision::Delete(clip));
            } else {
                tracing::warn!(key = %clip.key, "not observed in an incomplete walk; keeping");
                finish.deferred.push(clip);
            }
        }
        finish
    }
}

/// Bounded retry with exponential backoff for catalog writes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            max_retries: cfg.max_write_retries,
            base_backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or retries run out. The final failure is
    /// reported as a [`CatalogError::Write`] for `key`.
    pub async fn run<T, F, Fut>(&self, key: &str, mut op: F) -> Result<T, CatalogError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: base, 2x, 4x, ...
                let delay = self.base_backoff * (1u32 << (attempt - 1).min(10));
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(key, attempt, error = %e, "catalog write failed");
                    last_err = Some(e);
                }
            }
        }

        Err(CatalogError::Write {
            key: key.to_string(),
            message: last_err
                .map(|e| format!("{:#}", e))
                .unwrap_or_else(|| "write failed after retries".to_string()),
        })
    }
}

/// Apply one decision's write. Returns the id of the clip that now exists,
/// or `None` for a delete.
pub async fn apply_decision(
    store: &dyn CatalogStore,
    decision: &Decision,
    retry: &RetryPolicy,
) -> Result<Option<i64>, CatalogError> {
    let key = decision.key();
    match decision {
        Decision::Insert(group) => {
            let id = retry.run(key, || store.insert_clip(group)).await?;
            Ok(Some(id))
        }
        Decision::UpdateFormats { clip, group } => {
            retry
                .run(key, || store.update_formats(clip.id, group.formats))
                .await?;
            Ok(Some(clip.id))
        }
        Decision::NoChange { clip, .. } => Ok(Some(clip.id)),
        Decision::Delete(clip) => {
            retry.run(key, || store.delete_clip(clip.id)).await?;
            Ok(None)
        }
    }
}
