//! Import backfill: seed the scan table from the file tables.
//!
//! Walks each selected table oldest first and inserts a bare Unknown record
//! for every hash that has none yet. Existing records are never touched, so
//! the import can be re-run or resumed at any time. New uploads take the
//! [`Importer::record_upload`] path instead.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::candidate::resolve;
use crate::error::ScanError;
use crate::models::SourceTable;
use crate::rows::RowSource;
use crate::store::{MatchStore, UpdateLog};

/// Update-log key recording that a full import has completed.
pub const IMPORT_COMPLETE_KEY: &str = "mediamoderation_scan-import-v1";

/// Outcome of one [`Importer::import_batch`] call.
#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub table: SourceTable,
    pub rows_seen: usize,
    pub inserted: u64,
    /// Cursor for the next batch; `None` once the table is exhausted.
    pub next: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub tables: Vec<SourceTable>,
    /// Resume point for the first selected table.
    pub start_timestamp: Option<String>,
    pub force: bool,
    pub batch_size: usize,
    pub sleep: Duration,
}

impl ImportOptions {
    /// Default table selection with no resume point.
    pub fn is_full_run(&self) -> bool {
        self.tables.as_slice() == SourceTable::ALL.as_slice() && self.start_timestamp.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub batches: usize,
    pub rows_seen: usize,
    pub inserted: u64,
    pub skipped: bool,
    pub marked_complete: bool,
}

pub struct Importer {
    store: Arc<dyn MatchStore>,
    rows: RowSource,
    updatelog: Arc<dyn UpdateLog>,
}

impl Importer {
    pub fn new(store: Arc<dyn MatchStore>, rows: RowSource, updatelog: Arc<dyn UpdateLog>) -> Self {
        Self {
            store,
            rows,
            updatelog,
        }
    }

    /// Import one page of `table` starting at `cursor`.
    pub async fn import_batch(
        &self,
        table: SourceTable,
        cursor: Option<&str>,
        batch_size: usize,
    ) -> Result<ImportBatch, ScanError> {
        let page = self.rows.page(table, cursor, None, batch_size).await?;

        let mut seen = HashSet::new();
        let hashes: Vec<String> = page
            .rows
            .iter()
            .map(resolve)
            .map(|c| c.hash)
            .filter(|h| !h.is_empty())
            .filter(|h| seen.insert(h.clone()))
            .collect();

        let inserted = if hashes.is_empty() {
            0
        } else {
            let existing = self.store.existing_hashes(&hashes).await?;
            let missing: Vec<String> = hashes
                .into_iter()
                .filter(|h| !existing.contains(h))
                .collect();
            if missing.is_empty() {
                0
            } else {
                self.store.insert_unknown(&missing).await?
            }
        };

        debug!(table = %table, rows = page.rows.len(), inserted, "import batch");
        Ok(ImportBatch {
            table,
            rows_seen: page.rows.len(),
            inserted,
            next: page.next,
        })
    }

    /// Run the import over `options.tables`, printing a checkpoint line per
    /// batch so an interrupted run can be resumed.
    pub async fn run(&self, options: &ImportOptions) -> Result<ImportReport, ScanError> {
        let mut report = ImportReport::default();

        if !options.force && self.updatelog.is_done(IMPORT_COMPLETE_KEY).await? {
            println!("Import already complete ({}). Use --force to run it again.", IMPORT_COMPLETE_KEY);
            report.skipped = true;
            return Ok(report);
        }

        for (i, &table) in options.tables.iter().enumerate() {
            let mut cursor = if i == 0 {
                options.start_timestamp.clone()
            } else {
                None
            };
            println!("Importing {}...", table);

            loop {
                let batch = self
                    .import_batch(table, cursor.as_deref(), options.batch_size)
                    .await?;
                report.batches += 1;
                report.rows_seen += batch.rows_seen;
                report.inserted += batch.inserted;

                println!(
                    "  {}  next={}  rows={}  inserted={}",
                    table,
                    batch.next.as_deref().unwrap_or("-"),
                    batch.rows_seen,
                    batch.inserted
                );

                match batch.next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
                if !options.sleep.is_zero() {
                    tokio::time::sleep(options.sleep).await;
                }
            }
        }

        if options.is_full_run() || options.force {
            self.updatelog.mark_done(IMPORT_COMPLETE_KEY).await?;
            report.marked_complete = true;
        }

        info!(
            batches = report.batches,
            rows = report.rows_seen,
            inserted = report.inserted,
            complete = report.marked_complete,
            "import finished"
        );
        Ok(report)
    }

    /// Upload-time hook: make sure `hash` has a record. Returns `true` if
    /// one was created.
    pub async fn record_upload(&self, hash: &str) -> Result<bool, ScanError> {
        if hash.is_empty() {
            return Ok(false);
        }
        self.store.ensure_exists(hash).await
    }
}
