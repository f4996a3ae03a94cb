//! Scan-table overview and per-hash inspection for `matchscan status`.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::{MatchStatus, SourceTable};
use crate::store::MatchStore;
use crate::tables::columns;

/// Counts over the whole scan table.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanTableStats {
    pub total: i64,
    pub unknown: i64,
    pub negative: i64,
    pub positive: i64,
    pub never_checked: i64,
}

pub async fn scan_table_stats(pool: &SqlitePool) -> Result<ScanTableStats> {
    let (total, unknown, negative, positive, never_checked): (i64, i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(mms_is_match IS NULL), 0),
                COALESCE(SUM(mms_is_match = 0), 0),
                COALESCE(SUM(mms_is_match = 1), 0),
                COALESCE(SUM(mms_last_checked IS NULL), 0)
            FROM mediamoderation_scan
            "#,
        )
        .fetch_one(pool)
        .await?;

    Ok(ScanTableStats {
        total,
        unknown,
        negative,
        positive,
        never_checked,
    })
}

/// Rows carrying `hash` in each source table, in scan priority order.
pub async fn candidate_counts(pool: &SqlitePool, hash: &str) -> Result<Vec<(SourceTable, i64)>> {
    let mut counts = Vec::with_capacity(SourceTable::ALL.len());
    for table in SourceTable::ALL {
        let cols = columns(table);
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?", cols.table, cols.hash);
        let count: i64 = sqlx::query_scalar(&sql).bind(hash).fetch_one(pool).await?;
        counts.push((table, count));
    }
    Ok(counts)
}

pub async fn run_status(pool: &SqlitePool, store: &dyn MatchStore, hash: Option<&str>) -> Result<()> {
    let Some(hash) = hash else {
        let stats = scan_table_stats(pool).await?;
        println!("Scan table");
        println!("==========");
        println!();
        println!("  Hashes:        {}", stats.total);
        println!("  Unknown:       {}", stats.unknown);
        println!("  Negative:      {}", stats.negative);
        println!("  Positive:      {}", stats.positive);
        println!("  Never checked: {}", stats.never_checked);
        return Ok(());
    };

    match store.get(hash).await? {
        Some(record) => {
            println!("{}", record.hash);
            println!("  status:       {}", record.status);
            println!(
                "  last checked: {}",
                record
                    .last_checked
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "never".to_string())
            );
        }
        None => {
            println!("{}", hash);
            println!("  status:       {} (no record)", MatchStatus::Unknown);
        }
    }

    for (table, count) in candidate_counts(pool, hash).await? {
        println!("  {:<12}  {}", table, count);
    }
    Ok(())
}
