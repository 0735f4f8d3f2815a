use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table, index, and trigger. Safe to run repeatedly.
/// Whether the catalog tables exist yet.
pub async fn has_schema(pool: &SqlitePool) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'clips'")
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Create clips table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clips (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL,
            stem TEXT NOT NULL,
            parent TEXT NOT NULL,
            mp3 INTEGER NOT NULL DEFAULT 0,
            m4a INTEGER NOT NULL DEFAULT 0,
            m4r INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create tags table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            clip_id INTEGER NOT NULL,
            artist TEXT,
            album TEXT,
            title TEXT,
            year INTEGER,
            FOREIGN KEY (clip_id) REFERENCES clips(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_clips_key ON clips(key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_clips_parent_stem ON clips(parent, stem)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_clip_id ON tags(clip_id)")
        .execute(pool)
        .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='tags_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE tags_fts USING fts5(
                title,
                album,
                artist,
                content='tags',
                content_rowid='id'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // External-content FTS tables are maintained by triggers on the base table.
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS tags_fts_insert AFTER INSERT ON tags BEGIN
            INSERT INTO tags_fts(rowid, title, album, artist)
            VALUES (new.id, new.title, new.album, new.artist);
        END
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS tags_fts_delete AFTER DELETE ON tags BEGIN
            INSERT INTO tags_fts(tags_fts, rowid, title, album, artist)
            VALUES ('delete', old.id, old.title, old.album, old.artist);
        END
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS tags_fts_update AFTER UPDATE ON tags BEGIN
            INSERT INTO tags_fts(tags_fts, rowid, title, album, artist)
            VALUES ('delete', old.id, old.title, old.album, old.artist);
            INSERT INTO tags_fts(rowid, title, album, artist)
            VALUES (new.id, new.title, new.album, new.artist);
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
