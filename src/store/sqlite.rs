//! SQLite-backed [`CatalogStore`] implementation.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::CatalogStore;
use crate::models::{Clip, ClipGroup, FormatSet, TagData};

/// SQLite implementation of the [`CatalogStore`] trait.
///
/// Wraps a [`SqlitePool`] whose connections enforce foreign keys, so the
/// `tags` rows cascade when their clip is deleted.
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_clip(row: &SqliteRow) -> Clip {
    Clip {
        id: row.get("id"),
        key: row.get("key"),
        stem: row.get("stem"),
        parent: row.get("parent"),
        formats: FormatSet::new(row.get("mp3"), row.get("m4a"), row.get("m4r")),
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn load_clips(&self, key_prefix: Option<&str>) -> Result<Vec<Clip>> {
        let rows = match key_prefix {
            Some(prefix) => {
                sqlx::query(
                    "SELECT id, key, stem, parent, mp3, m4a, m4r FROM clips \
                     WHERE substr(key, 1, length(?)) = ? ORDER BY key ASC",
                )
                .bind(prefix)
                .bind(prefix)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT id, key, stem, parent, mp3, m4a, m4r FROM clips ORDER BY key ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.iter().map(row_to_clip).collect())
    }

    async fn insert_clip(&self, group: &ClipGroup) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO clips (key, stem, parent, mp3, m4a, m4r) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&group.key)
        .bind(&group.stem)
        .bind(&group.parent)
        .bind(group.formats.mp3)
        .bind(group.formats.m4a)
        .bind(group.formats.m4r)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn update_formats(&self, clip_id: i64, formats: FormatSet) -> Result<()> {
        let result = sqlx::query("UPDATE clips SET mp3 = ?, m4a = ?, m4r = ? WHERE id = ?")
            .bind(formats.mp3)
            .bind(formats.m4a)
            .bind(formats.m4r)
            .bind(clip_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("clip {} no longer exists", clip_id);
        }
        Ok(())
    }

    async fn delete_clip(&self, clip_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // The cascade would remove the tag as well; deleting it explicitly
        // keeps the FTS triggers firing even if foreign keys are off.
        sqlx::query("DELETE FROM tags WHERE clip_id = ?")
            .bind(clip_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM clips WHERE id = ?")
            .bind(clip_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_tag(&self, clip_id: i64) -> Result<Option<TagData>> {
        let row = sqlx::query("SELECT artist, album, title, year FROM tags WHERE clip_id = ?")
            .bind(clip_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| TagData {
            artist: row.get("artist"),
            album: row.get("album"),
            title: row.get("title"),
            year: row.get("year"),
        }))
    }

    async fn upsert_tag(&self, clip_id: i64, tag: &TagData) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tags (clip_id, artist, album, title, year)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(clip_id) DO UPDATE SET
                artist = excluded.artist,
                album = excluded.album,
                title = excluded.title,
                year = excluded.year
            "#,
        )
        .bind(clip_id)
        .bind(&tag.artist)
        .bind(&tag.album)
        .bind(&tag.title)
        .bind(tag.year)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_tag(&self, clip_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tags WHERE clip_id = ?")
            .bind(clip_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioFormat, ClipKey};
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> SqliteCatalog {
        let path = tmp.path().join("catalog.sqlite");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        SqliteCatalog::new(pool)
    }

    fn group(parent: &str, stem: &str, formats: &[AudioFormat]) -> ClipGroup {
        let mut g = ClipGroup::new(&ClipKey::new(parent, stem));
        for f in formats {
            g.add_file(*f, &format!("{}.{}", stem, f.extension()));
        }
        g
    }

    #[tokio::test]
    async fn insert_update_and_load() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;

        let id = store
            .insert_clip(&group("clips", "a", &[AudioFormat::Mp3, AudioFormat::M4a]))
            .await
            .unwrap();
        store
            .update_formats(id, FormatSet::new(true, false, false))
            .await
            .unwrap();

        let clips = store.load_clips(None).await.unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].key, "clips/a");
        assert_eq!(clips[0].formats, FormatSet::new(true, false, false));
    }

    #[tokio::test]
    async fn prefix_load_filters_by_key() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        store.insert_clip(&group("clips", "a", &[AudioFormat::Mp3])).await.unwrap();
        store.insert_clip(&group("other", "b", &[AudioFormat::M4r])).await.unwrap();
        store.insert_clip(&group(".", "c", &[AudioFormat::M4a])).await.unwrap();

        let clips = store.load_clips(Some("clips/")).await.unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].key, "clips/a");
        assert_eq!(store.load_clips(None).await.unwrap().len(), 3);
        assert!(store.load_clips(Some("zzz")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        store.insert_clip(&group("clips", "a", &[AudioFormat::Mp3])).await.unwrap();
        assert!(store
            .insert_clip(&group("clips", "a", &[AudioFormat::M4a]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn tag_upsert_replaces_and_delete_cascades() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let id = store.insert_clip(&group("clips", "a", &[AudioFormat::Mp3])).await.unwrap();

        let first = TagData {
            artist: Some("Artist".into()),
            title: Some("Title".into()),
            ..Default::default()
        };
        store.upsert_tag(id, &first).await.unwrap();
        let second = TagData {
            year: Some(2019),
            ..first.clone()
        };
        store.upsert_tag(id, &second).await.unwrap();
        assert_eq!(store.load_tag(id).await.unwrap(), Some(second));

        let tag_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(tag_rows, 1);

        store.delete_clip(id).await.unwrap();
        assert!(store.load_tag(id).await.unwrap().is_none());
        assert!(store.load_clips(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tags_are_full_text_searchable() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let id = store.insert_clip(&group("clips", "a", &[AudioFormat::Mp3])).await.unwrap();
        store
            .upsert_tag(
                id,
                &TagData {
                    title: Some("Marsupial Gurgle".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let hits: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tags_fts WHERE tags_fts MATCH 'gurgle'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(hits, 1);

        assert!(store.delete_tag(id).await.unwrap());
        assert!(!store.delete_tag(id).await.unwrap());
        let hits: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tags_fts WHERE tags_fts MATCH 'gurgle'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(hits, 0);
    }
}
