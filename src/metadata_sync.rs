//! Tag synchronization for settled clips.
//!
//! Extracts tags from a clip's canonical source file (mp3, then m4a, then
//! m4r) and brings the stored tag row in line with it. A failed extraction
//! leaves the stored row alone.

use std::path::{Path, PathBuf};

use crate::error::CatalogError;
use crate::models::ClipGroup;
use crate::reconcile::RetryPolicy;
use crate::store::CatalogStore;
use crate::tag_extract::TagExtractor;

/// What happened to one clip's tag row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOutcome {
    /// Row created or replaced with new data.
    Upserted,
    /// Extracted data matched the stored row; nothing written.
    Unchanged,
    /// No tags on disk, stored row deleted.
    Removed,
    /// No tags on disk and none stored.
    NoTags,
}

pub struct MetadataSync<'a> {
    store: &'a dyn CatalogStore,
    extractor: &'a dyn TagExtractor,
    root: &'a Path,
    retry: RetryPolicy,
    dry_run: bool,
}

impl<'a> MetadataSync<'a> {
    pub fn new(
        store: &'a dyn CatalogStore,
        extractor: &'a dyn TagExtractor,
        root: &'a Path,
        retry: RetryPolicy,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            extractor,
            root,
            retry,
            dry_run,
        }
    }

    /// Absolute path of the file tags are read from.
    pub fn source_path(&self, group: &ClipGroup) -> Option<PathBuf> {
        let (_, rel) = group.canonical_source()?;
        Some(rel.split('/').fold(self.root.to_path_buf(), |p, part| p.join(part)))
    }

    /// Sync tags for one clip. `clip_id` is `None` for a clip that a dry run
    /// would insert; it is compared against an empty tag row.
    pub async fn sync_clip(
        &self,
        clip_id: Option<i64>,
        group: &ClipGroup,
    ) -> Result<TagOutcome, CatalogError> {
        let Some(path) = self.source_path(group) else {
            return Ok(TagOutcome::NoTags);
        };

        let extracted = self.extractor.extract(&path)?;

        let stored = match clip_id {
            Some(id) => self.retry.run(&group.key, || self.store.load_tag(id)).await?,
            None => None,
        };

        let outcome = match (extracted, stored) {
            (Some(new), Some(old)) if new == old => TagOutcome::Unchanged,
            (Some(new), _) => {
                if let (Some(id), false) = (clip_id, self.dry_run) {
                    self.retry
                        .run(&group.key, || self.store.upsert_tag(id, &new))
                        .await?;
                }
                TagOutcome::Upserted
            }
            (None, Some(_)) => {
                if let (Some(id), false) = (clip_id, self.dry_run) {
                    self.retry
                        .run(&group.key, || self.store.delete_tag(id))
                        .await?;
                }
                TagOutcome::Removed
            }
            (None, None) => TagOutcome::NoTags,
        };

        tracing::debug!(key = %group.key, file = %path.display(), ?outcome, "tags synced");
        Ok(outcome)
    }
}
