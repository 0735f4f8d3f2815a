//! Catalog statistics.
//!
//! Provides a quick summary of what's cataloged: clip counts, per-format
//! coverage, and tag coverage. Used by `clipcat stats` to give confidence
//! that scans are working as expected.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub clips: i64,
    pub mp3: i64,
    pub m4a: i64,
    pub m4r: i64,
    pub tagged: i64,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<CatalogStats> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS clips,
            COALESCE(SUM(mp3), 0) AS mp3,
            COALESCE(SUM(m4a), 0) AS m4a,
            COALESCE(SUM(m4r), 0) AS m4r
        FROM clips
        "#,
    )
    .fetch_one(pool)
    .await?;

    let tagged: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
        .fetch_one(pool)
        .await?;

    Ok(CatalogStats {
        clips: row.get("clips"),
        mp3: row.get("mp3"),
        m4a: row.get("m4a"),
        m4r: row.get("m4r"),
        tagged,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await;
    pool.close().await;
    let stats = stats?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Clip Catalog — Database Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Clips:       {}", stats.clips);
    println!("    mp3:       {}", stats.mp3);
    println!("    m4a:       {}", stats.m4a);
    println!("    m4r:       {}", stats.m4r);
    println!(
        "  Tagged:      {} / {} ({}%)",
        stats.tagged,
        stats.clips,
        if stats.clips > 0 {
            (stats.tagged * 100) / stats.clips
        } else {
            0
        }
    );
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
