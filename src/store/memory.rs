//! In-memory [`CatalogStore`] implementation.
//!
//! Stands in for a catalog that does not exist yet during a dry run, and
//! backs the pipeline tests. Uses `BTreeMap`s behind `std::sync::RwLock` and
//! counts every successful write so callers can assert that a run was a
//! no-op. Test builds can also make the next N writes for a key fail.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::CatalogStore;
use crate::models::{Clip, ClipGroup, FormatSet, TagData};

#[derive(Default)]
struct State {
    next_id: i64,
    clips: BTreeMap<i64, Clip>,
    tags: BTreeMap<i64, TagData>,
    writes: u64,
    /// Remaining injected failures, by clip key.
    failures: HashMap<String, u32>,
}

impl State {
    fn key_of(&self, clip_id: i64) -> Option<String> {
        self.clips.get(&clip_id).map(|c| c.key.clone())
    }

    fn take_failure(&mut self, key: &str) -> Result<()> {
        if let Some(remaining) = self.failures.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("injected write failure for '{}'", key);
            }
        }
        Ok(())
    }
}

/// In-memory catalog, empty until written to.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: RwLock<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes touching `key` fail.
    #[cfg(test)]
    pub(crate) fn fail_writes(&self, key: &str, count: u32) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.failures.insert(key.to_string(), count);
    }

    /// Number of successful writes since construction.
    pub fn write_count(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).writes
    }

    pub fn tag_count(&self) -> usize {
        self.state.read().unwrap_or_else(|e| e.into_inner()).tags.len()
    }

    /// Look up a clip by its key.
    pub fn clip(&self, key: &str) -> Option<Clip> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.clips.values().find(|c| c.key == key).cloned()
    }

    /// Look up the tag stored for a clip key.
    pub fn tag(&self, key: &str) -> Option<TagData> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let clip = state.clips.values().find(|c| c.key == key)?;
        state.tags.get(&clip.id).cloned()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn load_clips(&self, key_prefix: Option<&str>) -> Result<Vec<Clip>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut clips: Vec<Clip> = state
            .clips
            .values()
            .filter(|c| key_prefix.map_or(true, |p| c.key.starts_with(p)))
            .cloned()
            .collect();
        clips.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(clips)
    }

    async fn insert_clip(&self, group: &ClipGroup) -> Result<i64> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.take_failure(&group.key)?;
        if state.clips.values().any(|c| c.key == group.key) {
            bail!("UNIQUE constraint failed: clips.key ({})", group.key);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.clips.insert(
            id,
            Clip {
                id,
                key: group.key.clone(),
                stem: group.stem.clone(),
                parent: group.parent.clone(),
                formats: group.formats,
            },
        );
        state.writes += 1;
        Ok(id)
    }

    async fn update_formats(&self, clip_id: i64, formats: FormatSet) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let Some(key) = state.key_of(clip_id) else {
            bail!("clip {} no longer exists", clip_id);
        };
        state.take_failure(&key)?;
        if let Some(clip) = state.clips.get_mut(&clip_id) {
            clip.formats = formats;
        }
        state.writes += 1;
        Ok(())
    }

    async fn delete_clip(&self, clip_id: i64) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = state.key_of(clip_id) {
            state.take_failure(&key)?;
        }
        state.tags.remove(&clip_id);
        state.clips.remove(&clip_id);
        state.writes += 1;
        Ok(())
    }

    async fn load_tag(&self, clip_id: i64) -> Result<Option<TagData>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.tags.get(&clip_id).cloned())
    }

    async fn upsert_tag(&self, clip_id: i64, tag: &TagData) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let Some(key) = state.key_of(clip_id) else {
            bail!("FOREIGN KEY constraint failed: clip {}", clip_id);
        };
        state.take_failure(&key)?;
        state.tags.insert(clip_id, tag.clone());
        state.writes += 1;
        Ok(())
    }

    async fn delete_tag(&self, clip_id: i64) -> Result<bool> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = state.key_of(clip_id) {
            state.take_failure(&key)?;
        }
        let removed = state.tags.remove(&clip_id).is_some();
        if removed {
            state.writes += 1;
        }
        Ok(removed)
    }
}
