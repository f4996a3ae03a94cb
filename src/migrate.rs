//! Schema setup for `matchscan init`.
//!
//! Creates the subset of the wiki's file tables the scanner reads, plus the
//! scan table and the update log. Every statement is idempotent.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Current file revisions
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image (
            img_name TEXT PRIMARY KEY,
            img_size INTEGER NOT NULL DEFAULT 0,
            img_width INTEGER NOT NULL DEFAULT 0,
            img_height INTEGER NOT NULL DEFAULT 0,
            img_major_mime TEXT NOT NULL DEFAULT 'unknown',
            img_minor_mime TEXT NOT NULL DEFAULT 'unknown',
            img_timestamp TEXT NOT NULL,
            img_sha1 TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Superseded revisions
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oldimage (
            oi_name TEXT NOT NULL,
            oi_archive_name TEXT NOT NULL DEFAULT '',
            oi_size INTEGER NOT NULL DEFAULT 0,
            oi_width INTEGER NOT NULL DEFAULT 0,
            oi_height INTEGER NOT NULL DEFAULT 0,
            oi_major_mime TEXT NOT NULL DEFAULT 'unknown',
            oi_minor_mime TEXT NOT NULL DEFAULT 'unknown',
            oi_timestamp TEXT NOT NULL,
            oi_sha1 TEXT NOT NULL DEFAULT '',
            oi_deleted INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Deleted files
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS filearchive (
            fa_id INTEGER PRIMARY KEY AUTOINCREMENT,
            fa_name TEXT NOT NULL DEFAULT '',
            fa_storage_key TEXT,
            fa_size INTEGER NOT NULL DEFAULT 0,
            fa_width INTEGER NOT NULL DEFAULT 0,
            fa_height INTEGER NOT NULL DEFAULT 0,
            fa_major_mime TEXT NOT NULL DEFAULT 'unknown',
            fa_minor_mime TEXT NOT NULL DEFAULT 'unknown',
            fa_timestamp TEXT,
            fa_sha1 TEXT NOT NULL DEFAULT '',
            fa_deleted INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mediamoderation_scan (
            mms_sha1 TEXT PRIMARY KEY,
            mms_last_checked TEXT,
            mms_is_match INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS updatelog (
            ul_key TEXT PRIMARY KEY,
            ul_value TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS img_sha1_timestamp ON image(img_sha1, img_timestamp)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS img_timestamp ON image(img_timestamp)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS oi_sha1_timestamp ON oldimage(oi_sha1, oi_timestamp)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS oi_timestamp ON oldimage(oi_timestamp)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS fa_sha1_timestamp ON filearchive(fa_sha1, fa_timestamp)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS fa_timestamp ON filearchive(fa_timestamp)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS mms_last_checked ON mediamoderation_scan(mms_last_checked)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
