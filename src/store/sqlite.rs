//! SQLite-backed [`MatchStore`] and [`UpdateLog`].
//!
//! Statuses live in the nullable `mms_is_match` column (NULL unknown,
//! 0 negative, 1 positive) and check dates in `mms_last_checked` as
//! `YYYY-MM-DD` text, which sorts chronologically.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::warn;

use super::{DueFilter, MatchStore, UpdateLog};
use crate::error::ScanError;
use crate::models::{MatchRecord, MatchStatus};

pub const SCAN_TABLE: &str = "mediamoderation_scan";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite has a bound-parameter limit; stay well below it per statement.
const MAX_BINDS: usize = 500;

pub struct SqliteMatchStore {
    pool: SqlitePool,
}

impl SqliteMatchStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_date(hash: &str, raw: Option<String>) -> Option<NaiveDate> {
    let raw = raw?;
    match NaiveDate::parse_from_str(&raw, DATE_FORMAT) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(hash, value = %raw, error = %e, "unparseable mms_last_checked");
            None
        }
    }
}

fn status_clause(status: MatchStatus) -> &'static str {
    match status {
        MatchStatus::Unknown => "mms_is_match IS NULL",
        MatchStatus::Negative => "mms_is_match = 0",
        MatchStatus::Positive => "mms_is_match = 1",
    }
}

#[async_trait]
impl MatchStore for SqliteMatchStore {
    async fn get(&self, hash: &str) -> Result<Option<MatchRecord>, ScanError> {
        let row = sqlx::query(
            "SELECT mms_sha1, mms_last_checked, mms_is_match FROM mediamoderation_scan WHERE mms_sha1 = ?",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let hash: String = row.get("mms_sha1");
            let last_checked = parse_date(&hash, row.get("mms_last_checked"));
            MatchRecord {
                status: MatchStatus::from_db(row.get("mms_is_match")),
                last_checked,
                hash,
            }
        }))
    }

    async fn upsert_status(
        &self,
        hash: &str,
        status: MatchStatus,
        checked: NaiveDate,
    ) -> Result<(), ScanError> {
        sqlx::query(
            r#"
            INSERT INTO mediamoderation_scan (mms_sha1, mms_last_checked, mms_is_match)
            VALUES (?, ?, ?)
            ON CONFLICT(mms_sha1) DO UPDATE SET
                mms_last_checked = excluded.mms_last_checked,
                mms_is_match = excluded.mms_is_match
            "#,
        )
        .bind(hash)
        .bind(checked.format(DATE_FORMAT).to_string())
        .bind(status.to_db())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_exists(&self, hash: &str) -> Result<bool, ScanError> {
        let result = sqlx::query("INSERT OR IGNORE INTO mediamoderation_scan (mms_sha1) VALUES (?)")
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn existing_hashes(&self, hashes: &[String]) -> Result<HashSet<String>, ScanError> {
        let mut found = HashSet::new();
        for chunk in hashes.chunks(MAX_BINDS) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT mms_sha1 FROM mediamoderation_scan WHERE mms_sha1 IN (");
            let mut sep = qb.separated(", ");
            for h in chunk {
                sep.push_bind(h.as_str());
            }
            sep.push_unseparated(")");

            let rows = qb.build().fetch_all(&self.pool).await?;
            found.extend(rows.iter().map(|r| r.get::<String, _>("mms_sha1")));
        }
        Ok(found)
    }

    async fn insert_unknown(&self, hashes: &[String]) -> Result<u64, ScanError> {
        let mut inserted = 0;
        for chunk in hashes.chunks(MAX_BINDS) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT OR IGNORE INTO mediamoderation_scan (mms_sha1) ");
            qb.push_values(chunk.iter(), |mut b, h| {
                b.push_bind(h.as_str());
            });
            inserted += qb.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn hashes_due(&self, filter: &DueFilter) -> Result<Vec<String>, ScanError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT mms_sha1 FROM mediamoderation_scan WHERE (mms_last_checked IS NULL OR mms_last_checked < ",
        );
        qb.push_bind(filter.checked_before.format(DATE_FORMAT).to_string());
        qb.push(")");

        if !filter.statuses.is_empty() {
            let clauses: Vec<&str> = filter.statuses.iter().map(|s| status_clause(*s)).collect();
            qb.push(" AND (");
            qb.push(clauses.join(" OR "));
            qb.push(")");
        }

        qb.push(" ORDER BY mms_last_checked IS NOT NULL, mms_last_checked ASC, mms_sha1 ASC LIMIT ");
        qb.push_bind(filter.limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("mms_sha1")).collect())
    }
}

pub struct SqliteUpdateLog {
    pool: SqlitePool,
}

impl SqliteUpdateLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UpdateLog for SqliteUpdateLog {
    async fn is_done(&self, key: &str) -> Result<bool, ScanError> {
        let found: Option<String> = sqlx::query_scalar("SELECT ul_key FROM updatelog WHERE ul_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn mark_done(&self, key: &str) -> Result<(), ScanError> {
        sqlx::query("INSERT OR IGNORE INTO updatelog (ul_key, ul_value) VALUES (?, NULL)")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
