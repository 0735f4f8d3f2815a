//! Catalog listing by key prefix.
//!
//! Used by `clipcat list` to show what the catalog currently holds for a
//! subtree, with format flags and stored tags.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::models::{Clip, TagData};
use crate::store::{CatalogStore, SqliteCatalog};

#[derive(Debug, Clone, Serialize)]
pub struct ClipListing {
    #[serde(flatten)]
    pub clip: Clip,
    pub tag: Option<TagData>,
}

/// Load every clip under `prefix` with its tag row.
pub async fn list_clips(store: &dyn CatalogStore, prefix: Option<&str>) -> Result<Vec<ClipListing>> {
    let clips = store.load_clips(prefix).await?;
    let mut listings = Vec::with_capacity(clips.len());
    for clip in clips {
        let tag = store.load_tag(clip.id).await?;
        listings.push(ClipListing { clip, tag });
    }
    Ok(listings)
}

/// CLI wrapper: print a table or JSON lines.
pub async fn run_list(config: &Config, prefix: Option<&str>, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteCatalog::new(pool.clone());
    let listings = list_clips(&store, prefix).await;
    pool.close().await;
    let listings = listings?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    println!(
        "{:<40} {:<12} {:<24} {:<24} {}",
        "KEY", "FORMATS", "ARTIST", "TITLE", "YEAR"
    );
    for item in &listings {
        let tag = item.tag.clone().unwrap_or_default();
        println!(
            "{:<40} {:<12} {:<24} {:<24} {}",
            item.clip.key,
            item.clip.formats.to_string(),
            tag.artist.as_deref().unwrap_or("-"),
            tag.title.as_deref().unwrap_or("-"),
            tag.year.map(|y| y.to_string()).unwrap_or_else(|| "-".to_string())
        );
    }
    println!("{} clips", listings.len());
    Ok(())
}
