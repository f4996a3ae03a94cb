//! In-memory [`MatchStore`] and [`UpdateLog`] for tests and dry runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use super::{DueFilter, MatchStore, UpdateLog};
use crate::error::ScanError;
use crate::models::{MatchRecord, MatchStatus};

#[derive(Default)]
pub struct InMemoryMatchStore {
    records: Mutex<HashMap<String, MatchRecord>>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly.
    pub async fn insert(&self, record: MatchRecord) {
        self.records
            .lock()
            .await
            .insert(record.hash.clone(), record);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn get(&self, hash: &str) -> Result<Option<MatchRecord>, ScanError> {
        Ok(self.records.lock().await.get(hash).cloned())
    }

    async fn upsert_status(
        &self,
        hash: &str,
        status: MatchStatus,
        checked: NaiveDate,
    ) -> Result<(), ScanError> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(hash.to_string())
            .or_insert_with(|| MatchRecord::unscanned(hash));
        record.status = status;
        record.last_checked = Some(checked);
        Ok(())
    }

    async fn ensure_exists(&self, hash: &str) -> Result<bool, ScanError> {
        let mut records = self.records.lock().await;
        if records.contains_key(hash) {
            return Ok(false);
        }
        records.insert(hash.to_string(), MatchRecord::unscanned(hash));
        Ok(true)
    }

    async fn existing_hashes(&self, hashes: &[String]) -> Result<HashSet<String>, ScanError> {
        let records = self.records.lock().await;
        Ok(hashes
            .iter()
            .filter(|h| records.contains_key(h.as_str()))
            .cloned()
            .collect())
    }

    async fn insert_unknown(&self, hashes: &[String]) -> Result<u64, ScanError> {
        let mut records = self.records.lock().await;
        let mut inserted = 0;
        for h in hashes {
            if !records.contains_key(h) {
                records.insert(h.clone(), MatchRecord::unscanned(h.clone()));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn hashes_due(&self, filter: &DueFilter) -> Result<Vec<String>, ScanError> {
        let records = self.records.lock().await;
        let mut due: Vec<&MatchRecord> = records.values().filter(|r| filter.accepts(r)).collect();
        due.sort_by(|a, b| {
            (a.last_checked.is_some(), a.last_checked, &a.hash).cmp(&(
                b.last_checked.is_some(),
                b.last_checked,
                &b.hash,
            ))
        });
        Ok(due
            .into_iter()
            .take(filter.limit)
            .map(|r| r.hash.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryUpdateLog {
    keys: Mutex<HashSet<String>>,
}

impl InMemoryUpdateLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UpdateLog for InMemoryUpdateLog {
    async fn is_done(&self, key: &str) -> Result<bool, ScanError> {
        Ok(self.keys.lock().await.contains(key))
    }

    async fn mark_done(&self, key: &str) -> Result<(), ScanError> {
        self.keys.lock().await.insert(key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_insert_unknown_leaves_existing_untouched() {
        let store = InMemoryMatchStore::new();
        store
            .upsert_status("a", MatchStatus::Positive, date("2024-01-01"))
            .await
            .unwrap();
        let n = store
            .insert_unknown(&["a".to_string(), "b".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(store.get("a").await.unwrap().unwrap().status, MatchStatus::Positive);
        assert_eq!(store.get("b").await.unwrap().unwrap().status, MatchStatus::Unknown);
    }

    #[tokio::test]
    async fn test_hashes_due_orders_never_checked_first() {
        let store = InMemoryMatchStore::new();
        store.ensure_exists("never").await.unwrap();
        store
            .upsert_status("old", MatchStatus::Negative, date("2024-01-01"))
            .await
            .unwrap();
        store
            .upsert_status("today", MatchStatus::Negative, date("2024-06-01"))
            .await
            .unwrap();
        store
            .upsert_status("bad", MatchStatus::Positive, date("2023-01-01"))
            .await
            .unwrap();

        let due = store
            .hashes_due(&DueFilter {
                checked_before: date("2024-06-01"),
                statuses: vec![MatchStatus::Unknown, MatchStatus::Negative],
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(due, vec!["never".to_string(), "old".to_string()]);
    }
}
