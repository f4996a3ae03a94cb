//! # matchscan CLI
//!
//! Thin command-line wrapper over the scan pipeline.
//!
//! ## Usage
//!
//! ```bash
//! matchscan --config ./config/matchscan.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `matchscan init` | Create the database tables |
//! | `matchscan import` | Seed the scan table from the file tables |
//! | `matchscan scan` | Scan batches of due hashes |
//! | `matchscan scan-one <hash>` | Scan a single hash now |
//! | `matchscan resend <hash>` | Re-send the notification for a positive hash |
//! | `matchscan record-upload <hash>` | Upload hook: register a new hash |
//! | `matchscan status [hash]` | Scan-table overview or one hash in detail |
//!
//! Per-hash and per-batch status lines go to stdout; logs go to stderr and
//! are filtered with `RUST_LOG` (default `matchscan=info`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use matchscan::batch::{RunOptions, ScanBatchOptions};
use matchscan::config;
use matchscan::import::ImportOptions;
use matchscan::migrate;
use matchscan::models::{MatchStatus, SourceTable};
use matchscan::scan::today;
use matchscan::services::Services;
use matchscan::status;

/// Scan stored media against a remote hash-matching service.
#[derive(Parser)]
#[command(name = "matchscan", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/matchscan.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Insert an Unknown record for every stored hash that has none.
    ///
    /// Prints a checkpoint line per batch; resume an interrupted run with
    /// `--table` and `--start-timestamp`.
    Import {
        /// Restrict to these tables (image, oldimage, filearchive). Repeatable.
        #[arg(long = "table", value_parser = parse_table)]
        tables: Vec<SourceTable>,

        /// Resume the first selected table from this timestamp.
        #[arg(long)]
        start_timestamp: Option<String>,

        /// Run even if a previous import completed.
        #[arg(long)]
        force: bool,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Seconds to sleep between batches.
        #[arg(long)]
        sleep: Option<u64>,
    },

    /// Scan hashes not checked since a cutoff date.
    Scan {
        /// Select hashes last checked before this date (YYYY-MM-DD). Defaults to today.
        #[arg(long, value_parser = parse_date)]
        last_checked: Option<NaiveDate>,

        /// Only scan hashes with this status (unknown or negative). Repeatable.
        #[arg(long = "status", value_parser = parse_scan_status)]
        statuses: Vec<MatchStatus>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Stop after this many batches.
        #[arg(long)]
        max_batches: Option<usize>,

        /// Seconds to sleep between batches.
        #[arg(long)]
        sleep: Option<u64>,

        /// Hashes scanned in parallel within a batch.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Scan one hash immediately, regardless of when it was last checked.
    ScanOne { hash: String },

    /// Re-send the positive-match notification for a hash.
    Resend {
        hash: String,

        /// Leave out revisions uploaded before this timestamp (YYYYMMDDHHMMSS).
        #[arg(long)]
        min_timestamp: Option<String>,
    },

    /// Register a newly uploaded hash.
    RecordUpload { hash: String },

    /// Show scan-table counts, or one hash's record and candidates.
    Status { hash: Option<String> },
}

fn parse_table(s: &str) -> Result<SourceTable, String> {
    SourceTable::from_table_name(s).map_err(|e| e.to_string())
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("invalid date '{}': {}", s, e))
}

fn parse_scan_status(s: &str) -> Result<MatchStatus, String> {
    match s.parse::<MatchStatus>()? {
        MatchStatus::Positive => {
            Err("positive hashes are not re-scanned in batches; use scan-one".to_string())
        }
        status => Ok(status),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "matchscan=debug"
    } else {
        "matchscan=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import {
            tables,
            start_timestamp,
            force,
            batch_size,
            sleep,
        } => {
            let services = Services::from_config(&cfg).await?;
            let options = ImportOptions {
                tables: if tables.is_empty() {
                    SourceTable::ALL.to_vec()
                } else {
                    tables
                },
                start_timestamp,
                force,
                batch_size: batch_size.unwrap_or(cfg.import.batch_size).max(1),
                sleep: Duration::from_secs(sleep.unwrap_or(cfg.import.sleep_secs)),
            };
            let report = services.importer().run(&options).await?;
            if !report.skipped {
                println!(
                    "Import done: {} rows seen, {} records inserted{}.",
                    report.rows_seen,
                    report.inserted,
                    if report.marked_complete {
                        ", marked complete"
                    } else {
                        ""
                    }
                );
            }
        }
        Commands::Scan {
            last_checked,
            statuses,
            batch_size,
            max_batches,
            sleep,
            concurrency,
        } => {
            // The pool is sized from the effective concurrency.
            let mut cfg = cfg.clone();
            if let Some(c) = concurrency {
                cfg.scan.concurrency = c;
            }
            cfg.scan.concurrency = cfg.scan.concurrency.max(1);

            let services = Services::from_config(&cfg).await?;
            let scanner = services.photodna_scanner(&cfg)?;
            let mut batch = ScanBatchOptions::new(
                last_checked.unwrap_or_else(today),
                batch_size.unwrap_or(cfg.scan.batch_size).max(1),
            );
            if !statuses.is_empty() {
                batch.statuses = statuses;
            }
            batch.concurrency = cfg.scan.concurrency;

            let report = services
                .scan_driver(scanner)
                .run(&RunOptions {
                    batch,
                    max_batches,
                    sleep: Duration::from_secs(sleep.unwrap_or(cfg.scan.sleep_secs)),
                })
                .await?;
            println!(
                "Scan done: {} batches, {} hashes, {} positive, {} inconclusive.",
                report.batches, report.scanned, report.positives, report.inconclusive
            );
        }
        Commands::ScanOne { hash } => {
            let services = Services::from_config(&cfg).await?;
            let scanner = services.photodna_scanner(&cfg)?;
            let outcome = scanner.scan(&hash).await?;
            println!("{}", outcome.summary_line());
        }
        Commands::Resend {
            hash,
            min_timestamp,
        } => {
            let services = Services::from_config(&cfg).await?;
            services
                .notifier
                .notify_positive(&hash, min_timestamp.as_deref())
                .await
                .with_context(|| format!("Failed to resend notification for {}", hash))?;
            println!("Notification sent for {}.", hash);
        }
        Commands::RecordUpload { hash } => {
            let services = Services::from_config(&cfg).await?;
            if services.importer().record_upload(&hash).await? {
                println!("Recorded {}.", hash);
            } else {
                println!("{} already recorded.", hash);
            }
        }
        Commands::Status { hash } => {
            let services = Services::from_config(&cfg).await?;
            status::run_status(&services.pool, services.store.as_ref(), hash.as_deref()).await?;
        }
    }

    Ok(())
}
