//! Batch scan driver.
//!
//! Repeatedly selects hashes that are due (checked before a cutoff, or
//! never) and runs the [`Scanner`] on each. Between batches the driver
//! waits for replicas to catch up and then sleeps, which bounds the load on
//! the store and the remote service.
//!
//! Scanning writes today's date as the check date, so with a cutoff of
//! today or earlier every scanned hash drops out of the selection and the
//! loop ends once nothing is due.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::ScanError;
use crate::models::MatchStatus;
use crate::scan::{today, ScanOutcome, Scanner};
use crate::store::{DueFilter, MatchStore};

/// Wait until writes from the last batch are visible to readers.
#[async_trait]
pub trait ReplicaLag: Send + Sync {
    async fn wait_for_replication(&self) -> Result<(), ScanError>;
}

/// For stores without replicas.
pub struct NoReplicas;

#[async_trait]
impl ReplicaLag for NoReplicas {
    async fn wait_for_replication(&self) -> Result<(), ScanError> {
        Ok(())
    }
}

/// SQLite in WAL mode has no replicas; folding the WAL back into the main
/// database between batches keeps it from growing through a long run.
pub struct WalCheckpoint {
    pool: SqlitePool,
}

impl WalCheckpoint {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReplicaLag for WalCheckpoint {
    async fn wait_for_replication(&self) -> Result<(), ScanError> {
        sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ScanBatchOptions {
    pub checked_before: NaiveDate,
    /// Eligible statuses; Positive hashes are excluded by default.
    pub statuses: Vec<MatchStatus>,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl ScanBatchOptions {
    pub fn new(checked_before: NaiveDate, batch_size: usize) -> Self {
        Self {
            checked_before,
            statuses: vec![MatchStatus::Unknown, MatchStatus::Negative],
            batch_size,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub selected: usize,
    pub outcomes: Vec<ScanOutcome>,
}

impl BatchReport {
    pub fn positives(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == MatchStatus::Positive)
            .count()
    }

    pub fn inconclusive(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.ok).count()
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub batch: ScanBatchOptions,
    pub max_batches: Option<usize>,
    pub sleep: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub batches: usize,
    pub scanned: usize,
    pub positives: usize,
    pub inconclusive: usize,
}

pub struct ScanDriver {
    store: Arc<dyn MatchStore>,
    scanner: Arc<Scanner>,
    lag: Arc<dyn ReplicaLag>,
}

impl ScanDriver {
    pub fn new(store: Arc<dyn MatchStore>, scanner: Arc<Scanner>, lag: Arc<dyn ReplicaLag>) -> Self {
        Self {
            store,
            scanner,
            lag,
        }
    }

    /// Select and scan one batch, printing a status line per hash.
    ///
    /// A store failure aborts the batch and is returned; in-flight scans of
    /// a concurrent batch are cancelled.
    pub async fn scan_batch(&self, options: &ScanBatchOptions) -> Result<BatchReport, ScanError> {
        let hashes = self
            .store
            .hashes_due(&DueFilter {
                checked_before: options.checked_before,
                statuses: options.statuses.clone(),
                limit: options.batch_size,
            })
            .await?;

        let mut report = BatchReport {
            selected: hashes.len(),
            outcomes: Vec::with_capacity(hashes.len()),
        };

        if options.concurrency <= 1 {
            for hash in &hashes {
                let outcome = self.scanner.scan(hash).await?;
                println!("{}", outcome.summary_line());
                report.outcomes.push(outcome);
            }
            return Ok(report);
        }

        let mut workers = JoinSet::new();
        let mut pending = hashes.into_iter();
        loop {
            while workers.len() < options.concurrency {
                let Some(hash) = pending.next() else { break };
                let scanner = Arc::clone(&self.scanner);
                workers.spawn(async move { scanner.scan(&hash).await });
            }
            let Some(joined) = workers.join_next().await else {
                break;
            };
            let outcome = joined??;
            println!("{}", outcome.summary_line());
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    /// Scan batches until nothing is due or `max_batches` is reached.
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport, ScanError> {
        let mut batch = options.batch.clone();
        let today = today();
        if batch.checked_before > today {
            warn!(
                requested = %batch.checked_before,
                %today,
                "cutoff is in the future; using today so the run can finish"
            );
            batch.checked_before = today;
        }

        let mut totals = RunReport::default();
        loop {
            if options.max_batches.is_some_and(|max| totals.batches >= max) {
                info!(batches = totals.batches, "reached --max-batches");
                break;
            }

            let report = self.scan_batch(&batch).await?;
            if report.selected == 0 {
                debug!("no hashes due");
                break;
            }
            totals.batches += 1;
            totals.scanned += report.outcomes.len();
            totals.positives += report.positives();
            totals.inconclusive += report.inconclusive();
            info!(
                batch = totals.batches,
                scanned = report.outcomes.len(),
                positives = report.positives(),
                inconclusive = report.inconclusive(),
                "batch complete"
            );

            self.lag.wait_for_replication().await?;
            if !options.sleep.is_zero() {
                tokio::time::sleep(options.sleep).await;
            }
        }

        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NotifyConfig, WikiConfig};
    use crate::matcher::StatusCode;
    use crate::models::MatchRecord;
    use crate::notify::Notifier;
    use crate::rows::tests::{image, VecFetcher};
    use crate::rows::RowSource;
    use crate::scan::tests::{CountingTransport, NameBytes, ScriptedMatcher};
    use crate::store::memory::InMemoryMatchStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLag(AtomicUsize);

    #[async_trait]
    impl ReplicaLag for CountingLag {
        async fn wait_for_replication(&self) -> Result<(), ScanError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn driver(n: usize) -> (ScanDriver, Arc<InMemoryMatchStore>, Arc<CountingLag>) {
        let store = Arc::new(InMemoryMatchStore::new());
        let mut rows = Vec::new();
        let mut matcher = ScriptedMatcher::default();
        for i in 0..n {
            let name = format!("f{}.jpg", i);
            let hash = format!("h{}", i);
            rows.push(image(&name, "20200101000000", &hash));
            matcher
                .answers
                .insert(name, Some((StatusCode::Ok, i % 5 == 0)));
            store.insert(MatchRecord::unscanned(hash)).await;
        }
        store
            .insert(MatchRecord {
                hash: "already".to_string(),
                status: MatchStatus::Positive,
                last_checked: None,
            })
            .await;

        let source = RowSource::new(Arc::new(VecFetcher::new(rows)), 5);
        let notifier = Arc::new(Notifier::new(
            store.clone(),
            source.clone(),
            Arc::new(CountingTransport::default()),
            &NotifyConfig::default(),
            WikiConfig::default(),
        ));
        let scanner = Arc::new(Scanner::new(
            store.clone(),
            source,
            Arc::new(matcher),
            Arc::new(NameBytes::default()),
            notifier,
        ));
        let lag = Arc::new(CountingLag(AtomicUsize::new(0)));
        (ScanDriver::new(store.clone(), scanner, lag.clone()), store, lag)
    }

    #[tokio::test]
    async fn test_run_scans_every_due_hash_once() {
        let (driver, store, lag) = driver(12).await;
        let mut batch = ScanBatchOptions::new(today(), 5);
        batch.concurrency = 3;
        let report = driver
            .run(&RunOptions {
                batch,
                max_batches: None,
                sleep: Duration::ZERO,
            })
            .await
            .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.scanned, 12);
        assert_eq!(report.positives, 3);
        assert_eq!(lag.0.load(Ordering::SeqCst), 3);

        let untouched = store.get("already").await.unwrap().unwrap();
        assert_eq!(untouched.last_checked, None);
    }

    #[tokio::test]
    async fn test_max_batches_and_future_cutoff() {
        let (driver, _, _) = driver(12).await;
        let report = driver
            .run(&RunOptions {
                batch: ScanBatchOptions::new(today() + chrono::Days::new(30), 4),
                max_batches: Some(2),
                sleep: Duration::ZERO,
            })
            .await
            .unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.scanned, 8);
    }

    #[tokio::test]
    async fn test_status_filter() {
        let (driver, store, _) = driver(3).await;
        store
            .upsert_status("h1", MatchStatus::Negative, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
            .await
            .unwrap();
        let mut batch = ScanBatchOptions::new(today(), 10);
        batch.statuses = vec![MatchStatus::Negative];
        let report = driver.scan_batch(&batch).await.unwrap();
        assert_eq!(report.selected, 1);
        assert_eq!(report.outcomes[0].hash, "h1");
    }
}
