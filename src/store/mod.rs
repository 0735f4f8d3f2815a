//! Storage abstraction for the clip catalog.
//!
//! The [`CatalogStore`] trait is the only way the reconciler and tag sync
//! touch persisted state, so the pipeline can run against SQLite in
//! production and against [`InMemoryCatalog`] in tests.
//!
//! Every write method changes exactly one clip key. Implementations must
//! make each call atomic: a reader sees either the old row or the new one.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Clip, ClipGroup, ClipKey, FormatSet, TagData};

pub use memory::InMemoryCatalog;
pub use sqlite::SqliteCatalog;

/// Abstract catalog backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`load_clips`](CatalogStore::load_clips) | Full scan, optionally by key prefix |
/// | [`insert_clip`](CatalogStore::insert_clip) | Create a clip row from a disk group |
/// | [`update_formats`](CatalogStore::update_formats) | Rewrite a clip's format flags |
/// | [`delete_clip`](CatalogStore::delete_clip) | Remove a clip and its tag |
/// | [`load_tag`](CatalogStore::load_tag) | Read the tag row for a clip |
/// | [`upsert_tag`](CatalogStore::upsert_tag) | Insert or replace a clip's tag row |
/// | [`delete_tag`](CatalogStore::delete_tag) | Remove a clip's tag row |
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Load every clip whose key starts with `key_prefix` (all clips when `None`),
    /// ordered by key.
    async fn load_clips(&self, key_prefix: Option<&str>) -> Result<Vec<Clip>>;

    /// Insert a new clip row. Returns the new row id.
    async fn insert_clip(&self, group: &ClipGroup) -> Result<i64>;

    async fn update_formats(&self, clip_id: i64, formats: FormatSet) -> Result<()>;

    /// Delete a clip row together with its tag row.
    async fn delete_clip(&self, clip_id: i64) -> Result<()>;

    async fn load_tag(&self, clip_id: i64) -> Result<Option<TagData>>;

    async fn upsert_tag(&self, clip_id: i64, tag: &TagData) -> Result<()>;

    /// Returns `true` when a row was removed.
    async fn delete_tag(&self, clip_id: i64) -> Result<bool>;
}

/// In-memory view of the catalog taken once at the start of a run.
#[derive(Debug, Default, Clone)]
pub struct CatalogSnapshot {
    clips: HashMap<ClipKey, Clip>,
}

impl CatalogSnapshot {
    pub fn from_clips(clips: Vec<Clip>) -> Self {
        Self {
            clips: clips.into_iter().map(|c| (c.clip_key(), c)).collect(),
        }
    }

    pub async fn load(store: &dyn CatalogStore) -> Result<Self> {
        Ok(Self::from_clips(store.load_clips(None).await?))
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn get(&self, key: &ClipKey) -> Option<&Clip> {
        self.clips.get(key)
    }

    pub(crate) fn into_map(self) -> HashMap<ClipKey, Clip> {
        self.clips
    }
}
