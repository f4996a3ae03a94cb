//! End-to-end pipeline tests against a real SQLite database.
//!
//! The remote matcher, bytes provider, and mail transport are replaced by
//! in-test fakes; everything else is the production wiring from
//! [`Services::assemble`].

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::Mutex;

use matchscan::batch::{RunOptions, ScanBatchOptions};
use matchscan::config::{load_config, Config};
use matchscan::error::{BytesLookupError, MatcherError};
use matchscan::import::{ImportOptions, IMPORT_COMPLETE_KEY};
use matchscan::matcher::{MatchResponse, RemoteMatcher, StatusCode};
use matchscan::media::{BytesProvider, ScanBytes};
use matchscan::models::{FileCandidate, MatchStatus, SourceTable};
use matchscan::notify::{MailMessage, MailTransport};
use matchscan::rows::{page_rows, SqliteRowFetcher};
use matchscan::scan::today;
use matchscan::services::Services;
use matchscan::{db, migrate};

/// Matches any revision whose fake bytes start with "oldimage:".
struct OldRevisionsMatch;

#[async_trait]
impl RemoteMatcher for OldRevisionsMatch {
    async fn check(&self, bytes: &[u8], _mime: &str) -> Result<MatchResponse, MatcherError> {
        let is_match = bytes.starts_with(b"oldimage:");
        Ok(MatchResponse {
            status: StatusCode::Ok,
            raw_code: 3000,
            is_match,
            raw_body: String::new(),
        })
    }
}

/// Current revisions of `A.jpg` cannot be read.
struct TaggedBytes;

#[async_trait]
impl BytesProvider for TaggedBytes {
    async fn fetch(&self, c: &FileCandidate) -> Result<ScanBytes, BytesLookupError> {
        if c.source_table == SourceTable::Current && c.name == "A.jpg" {
            return Err(BytesLookupError::LookupFailed("thumbnail missing".to_string()));
        }
        Ok(ScanBytes {
            bytes: format!("{}:{}", c.source_table, c.name).into_bytes(),
            mime_type: c.mime_type.clone(),
            from_thumbnail: true,
        })
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<MailMessage>>,
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

async fn setup() -> (TempDir, Config, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("images")).unwrap();

    let config_path = root.join("matchscan.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{root}/data/wiki.sqlite"

[matcher]
endpoint = "http://127.0.0.1:9/unused"

[media]
root = "{root}/images"

[scan]
batch_size = 10
candidate_batch_size = 1

[notify]
recipients = ["trust-and-safety@example.org"]
sender = "wiki@example.org"

[wiki]
base_url = "https://wiki.example"
"#,
            root = root.display()
        ),
    )
    .unwrap();

    let cfg = load_config(&config_path).unwrap();
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    (tmp, cfg, pool)
}

async fn insert_image(pool: &SqlitePool, name: &str, ts: &str, sha1: &str) {
    sqlx::query(
        "INSERT INTO image (img_name, img_size, img_width, img_height, img_major_mime, \
         img_minor_mime, img_timestamp, img_sha1) VALUES (?, 1000, 800, 600, 'image', 'jpeg', ?, ?)",
    )
    .bind(name)
    .bind(ts)
    .bind(sha1)
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_oldimage(pool: &SqlitePool, name: &str, ts: &str, sha1: &str) {
    sqlx::query(
        "INSERT INTO oldimage (oi_name, oi_archive_name, oi_size, oi_width, oi_height, \
         oi_major_mime, oi_minor_mime, oi_timestamp, oi_sha1) \
         VALUES (?, ?, 1000, 800, 600, 'image', 'jpeg', ?, ?)",
    )
    .bind(name)
    .bind(format!("{}!{}", ts, name))
    .bind(ts)
    .bind(sha1)
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_deleted(pool: &SqlitePool, name: &str, ts: Option<&str>, sha1: &str) {
    sqlx::query(
        "INSERT INTO filearchive (fa_name, fa_storage_key, fa_size, fa_width, fa_height, \
         fa_major_mime, fa_minor_mime, fa_timestamp, fa_sha1) \
         VALUES (?, ?, 1000, 800, 600, 'image', 'png', ?, ?)",
    )
    .bind(name)
    .bind(format!("{}.png", sha1))
    .bind(ts)
    .bind(sha1)
    .execute(pool)
    .await
    .unwrap();
}

fn full_import(batch_size: usize) -> ImportOptions {
    ImportOptions {
        tables: SourceTable::ALL.to_vec(),
        start_timestamp: None,
        force: false,
        batch_size,
        sleep: Duration::ZERO,
    }
}

#[tokio::test]
async fn test_import_then_scan_flags_positive_once() {
    let (_tmp, cfg, pool) = setup().await;

    // H1: the current upload is unreadable, an older revision matches.
    insert_image(&pool, "A.jpg", "20240301120000", "H1").await;
    insert_oldimage(&pool, "B.jpg", "20200101000000", "H1").await;
    // H2: a clean file.
    insert_image(&pool, "Clean.jpg", "20240301120000", "H2").await;
    // H3: only a deleted copy, with no recorded upload time.
    insert_deleted(&pool, "Gone.png", None, "H3").await;

    let transport = Arc::new(RecordingTransport::default());
    let services = Services::assemble(pool.clone(), &cfg, Arc::new(TaggedBytes), transport.clone());

    let report = services.importer().run(&full_import(2)).await.unwrap();
    assert_eq!(report.inserted, 3);
    assert!(report.marked_complete);
    assert!(services.updatelog.is_done(IMPORT_COMPLETE_KEY).await.unwrap());

    let scanner = services.scanner(Arc::new(OldRevisionsMatch));
    let driver = services.scan_driver(scanner);
    let run = RunOptions {
        batch: ScanBatchOptions::new(today(), 10),
        max_batches: None,
        sleep: Duration::ZERO,
    };
    let totals = driver.run(&run).await.unwrap();
    assert_eq!(totals.scanned, 3);
    assert_eq!(totals.positives, 1);

    let h1 = services.store.get("H1").await.unwrap().unwrap();
    assert_eq!(h1.status, MatchStatus::Positive);
    assert_eq!(h1.last_checked, Some(today()));
    let h2 = services.store.get("H2").await.unwrap().unwrap();
    assert_eq!(h2.status, MatchStatus::Negative);
    let h3 = services.store.get("H3").await.unwrap().unwrap();
    assert_eq!(h3.status, MatchStatus::Negative);

    {
        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("H1"));
        assert!(sent[0].text_body.contains("A.jpg"));
        assert!(sent[0].text_body.contains("B.jpg"));
        assert!(sent[0]
            .text_body
            .contains("https://wiki.example/wiki/File:B.jpg#filehistory"));
    }

    // Everything was checked today, so a second run finds nothing due.
    let again = driver.run(&run).await.unwrap();
    assert_eq!(again.batches, 0);

    // A direct rescan keeps the positive status and sends nothing new.
    let outcome = services
        .scanner(Arc::new(OldRevisionsMatch))
        .scan("H1")
        .await
        .unwrap();
    assert_eq!(outcome.status, MatchStatus::Positive);
    assert!(!outcome.notified);
    assert_eq!(transport.sent.lock().await.len(), 1);
}

#[tokio::test]
async fn test_import_is_idempotent_against_sqlite() {
    let (_tmp, cfg, pool) = setup().await;
    insert_image(&pool, "One.jpg", "20240101000000", "H1").await;
    insert_oldimage(&pool, "One.jpg", "20230101000000", "H1").await;
    insert_image(&pool, "Two.jpg", "20240101000000", "H2").await;

    let services = Services::assemble(
        pool.clone(),
        &cfg,
        Arc::new(TaggedBytes),
        Arc::new(RecordingTransport::default()),
    );
    services
        .store
        .upsert_status("H2", MatchStatus::Positive, today())
        .await
        .unwrap();

    let first = services.importer().run(&full_import(1)).await.unwrap();
    assert_eq!(first.inserted, 1);

    let skipped = services.importer().run(&full_import(1)).await.unwrap();
    assert!(skipped.skipped);

    let mut forced = full_import(1);
    forced.force = true;
    assert_eq!(services.importer().run(&forced).await.unwrap().inserted, 0);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mediamoderation_scan")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
    let h2 = services.store.get("H2").await.unwrap().unwrap();
    assert_eq!(h2.status, MatchStatus::Positive);
}

#[tokio::test]
async fn test_sqlite_same_timestamp_group_is_widened() {
    let (_tmp, _cfg, pool) = setup().await;
    for i in 0..5 {
        insert_image(&pool, &format!("Same{}.jpg", i), "20220202020202", "H").await;
    }
    insert_image(&pool, "Later.jpg", "20230101000000", "H").await;

    let fetcher = SqliteRowFetcher::new(pool.clone());

    // Ascending: the five-row group fills more than one batch of 2.
    let first = page_rows(&fetcher, SourceTable::Current, None, None, 2)
        .await
        .unwrap();
    assert!(first.rows.is_empty());
    assert_eq!(first.next.as_deref(), Some("20220202020202"));

    let second = page_rows(&fetcher, SourceTable::Current, first.next.as_deref(), None, 2)
        .await
        .unwrap();
    assert_eq!(second.rows.len(), 5);
    assert_eq!(second.widened_to, Some(5));
    assert_eq!(second.next.as_deref(), Some("20230101000000"));

    let third = page_rows(&fetcher, SourceTable::Current, second.next.as_deref(), None, 2)
        .await
        .unwrap();
    assert_eq!(third.rows.len(), 1);
    assert!(third.next.is_none());

    // Hash-filtered walks go newest first.
    let newest = page_rows(&fetcher, SourceTable::Current, None, Some("H"), 2)
        .await
        .unwrap();
    assert_eq!(newest.rows.len(), 1);
    assert_eq!(newest.rows[0].sort_key(), "20230101000000");
}

#[tokio::test]
async fn test_resend_requires_positive_status() {
    let (_tmp, cfg, pool) = setup().await;
    insert_image(&pool, "A.jpg", "20240101000000", "H1").await;

    let transport = Arc::new(RecordingTransport::default());
    let services = Services::assemble(pool.clone(), &cfg, Arc::new(TaggedBytes), transport.clone());
    services.importer().record_upload("H1").await.unwrap();

    let err = services.notifier.notify_positive("H1", None).await.unwrap_err();
    assert!(err.to_string().contains("not positive"));
    assert!(transport.sent.lock().await.is_empty());

    services
        .store
        .upsert_status("H1", MatchStatus::Positive, today())
        .await
        .unwrap();
    services
        .notifier
        .notify_positive("H1", Some("20230101000000"))
        .await
        .unwrap();
    let sent = transport.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text_body.contains("A.jpg"));
}

#[tokio::test]
async fn test_pool_is_sized_for_scan_concurrency() {
    let (_tmp, mut cfg, pool) = setup().await;
    assert_eq!(pool.options().get_max_connections(), 5);
    pool.close().await;

    cfg.scan.concurrency = 16;
    let wide = db::connect(&cfg).await.unwrap();
    assert_eq!(wide.options().get_max_connections(), 18);
}
