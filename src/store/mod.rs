//! Match record storage.
//!
//! The [`MatchStore`] trait is the only shared mutable state in the
//! pipeline. Every write is scoped to a single hash key, so implementations
//! need no cross-row locking. Nothing is cached: each read reflects the
//! persisted state at call time.
//!
//! [`UpdateLog`] is the checkpoint store that records one-off maintenance
//! runs (the full import backfill) so they are not repeated.

pub mod memory;
pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::ScanError;
use crate::models::{MatchRecord, MatchStatus};

/// Selection of hashes due for a scan.
#[derive(Debug, Clone)]
pub struct DueFilter {
    /// Hashes last checked strictly before this date (or never) are due.
    pub checked_before: NaiveDate,
    /// Statuses eligible for selection. Empty means every status.
    pub statuses: Vec<MatchStatus>,
    pub limit: usize,
}

impl DueFilter {
    pub fn accepts(&self, record: &MatchRecord) -> bool {
        let due = record
            .last_checked
            .map_or(true, |d| d < self.checked_before);
        due && (self.statuses.is_empty() || self.statuses.contains(&record.status))
    }
}

/// Persistent table of scan state keyed by content hash.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](MatchStore::get) | Read one record |
/// | [`upsert_status`](MatchStore::upsert_status) | Atomic insert-or-update of status and check date |
/// | [`ensure_exists`](MatchStore::ensure_exists) | Insert a bare Unknown record if absent |
/// | [`existing_hashes`](MatchStore::existing_hashes) | Which of a batch already have records |
/// | [`insert_unknown`](MatchStore::insert_unknown) | Bulk insert-if-absent |
/// | [`hashes_due`](MatchStore::hashes_due) | Select a bounded batch for scanning |
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn get(&self, hash: &str) -> Result<Option<MatchRecord>, ScanError>;

    /// Write `status` and `checked` for `hash`, creating the record if absent.
    async fn upsert_status(
        &self,
        hash: &str,
        status: MatchStatus,
        checked: NaiveDate,
    ) -> Result<(), ScanError>;

    /// Returns `true` if a record was created.
    async fn ensure_exists(&self, hash: &str) -> Result<bool, ScanError>;

    async fn existing_hashes(&self, hashes: &[String]) -> Result<HashSet<String>, ScanError>;

    /// Insert Unknown records for any of `hashes` not yet present, leaving
    /// existing ones untouched. Returns the number inserted.
    async fn insert_unknown(&self, hashes: &[String]) -> Result<u64, ScanError>;

    async fn hashes_due(&self, filter: &DueFilter) -> Result<Vec<String>, ScanError>;
}

/// Persisted markers for completed maintenance runs.
#[async_trait]
pub trait UpdateLog: Send + Sync {
    async fn is_done(&self, key: &str) -> Result<bool, ScanError>;
    async fn mark_done(&self, key: &str) -> Result<(), ScanError>;
}
