//! # matchscan
//!
//! Scans a wiki's stored media against a remote perceptual-hash matching
//! service and alerts moderators when a file matches.
//!
//! Every stored file revision sits in one of three tables ([`models::SourceTable`]).
//! The scan table holds one [`models::MatchRecord`] per content hash. The
//! import backfill seeds it; the batch driver rescans whatever is due.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌───────────┐   ┌───────────┐
//! │ image        │   │ Row Source │   │  Scanner  │──▶│  Remote   │
//! │ oldimage     │──▶│ (paging)   │──▶│           │   │  matcher  │
//! │ filearchive  │   └────────────┘   └─────┬─────┘   └───────────┘
//! └──────────────┘                          │
//!                          ┌────────────────┼──────────────┐
//!                          ▼                ▼              ▼
//!                   ┌────────────┐   ┌────────────┐  ┌──────────┐
//!                   │ MatchStore │   │  Notifier  │  │  Bytes   │
//!                   └────────────┘   └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`tables`] | Column layout of the file tables |
//! | [`candidate`] | Row to [`models::FileCandidate`] mapping |
//! | [`rows`] | Timestamp-cursor pagination across the file tables |
//! | [`store`] | Match record and update-log storage |
//! | [`matcher`] | Remote matcher client |
//! | [`media`] | Scannable bytes from the upload directory |
//! | [`notify`] | Positive-match notifications |
//! | [`scan`] | Per-hash scan orchestration |
//! | [`import`] | Backfill of the scan table |
//! | [`batch`] | Batch scan driver |
//! | [`services`] | Component wiring |
//! | [`status`] | Scan-table inspection |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema setup |

pub mod batch;
pub mod candidate;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod matcher;
pub mod media;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod rows;
pub mod scan;
pub mod services;
pub mod status;
pub mod store;
pub mod tables;
