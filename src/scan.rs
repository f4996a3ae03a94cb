//! Scan orchestration for one content hash.
//!
//! [`Scanner::scan`] walks the stored revisions of a hash in priority order
//! (current, historical, deleted; newest first within each) and sends each
//! to the remote matcher until one yields a conclusive verdict. Failures on
//! individual revisions become warnings and the walk moves on.
//!
//! Status transitions per hash:
//!
//! ```text
//! Unknown ──conclusive──▶ Negative ──positive verdict──▶ Positive
//!    └────────────positive verdict─────────────────────────▲
//! ```
//!
//! Positive is terminal for automated scans. An inconclusive pass keeps the
//! previous status. The check date is written on every attempt, and moving
//! into Positive triggers exactly one notification.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::error::{BytesLookupError, MatcherError, ScanError};
use crate::matcher::RemoteMatcher;
use crate::media::BytesProvider;
use crate::models::{FileCandidate, MatchStatus};
use crate::notify::Notifier;
use crate::rows::RowSource;
use crate::store::MatchStore;

pub fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// A failure that did not stop the scan.
#[derive(Debug)]
pub struct ScanWarning {
    /// The revision it concerns, or `None` for a failed notification.
    pub candidate: Option<String>,
    pub error: ScanError,
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.candidate {
            Some(c) => write!(f, "{}: {}", c, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Result of one scan pass.
#[derive(Debug)]
pub struct ScanOutcome {
    pub hash: String,
    pub previous: MatchStatus,
    pub status: MatchStatus,
    /// True when some candidate produced a conclusive verdict.
    pub ok: bool,
    pub candidates_seen: usize,
    pub warnings: Vec<ScanWarning>,
    pub notified: bool,
}

impl ScanOutcome {
    /// One human-readable line for operators tailing batch output.
    pub fn summary_line(&self) -> String {
        let outcome = if self.ok { "ok" } else { "inconclusive" };
        let mut line = format!(
            "{}  {} -> {}  [{}]",
            self.hash, self.previous, self.status, outcome
        );
        if self.notified {
            line.push_str("  notified");
        }
        if self.candidates_seen == 0 {
            line.push_str("  no stored files found for this hash");
        }
        if !self.warnings.is_empty() {
            let errors: Vec<String> = self.warnings.iter().map(|w| w.to_string()).collect();
            line.push_str("  errors: ");
            line.push_str(&errors.join("; "));
        }
        line
    }
}

fn describe(candidate: &FileCandidate) -> String {
    format!(
        "{} {} @{}",
        candidate.source_table,
        candidate.name,
        candidate.timestamp.as_deref().unwrap_or("unknown")
    )
}

fn candidate_warning(candidate: &FileCandidate, error: impl Into<ScanError>) -> ScanWarning {
    ScanWarning {
        candidate: Some(describe(candidate)),
        error: error.into(),
    }
}

pub struct Scanner {
    store: Arc<dyn MatchStore>,
    rows: RowSource,
    matcher: Arc<dyn RemoteMatcher>,
    bytes: Arc<dyn BytesProvider>,
    notifier: Arc<Notifier>,
}

impl Scanner {
    pub fn new(
        store: Arc<dyn MatchStore>,
        rows: RowSource,
        matcher: Arc<dyn RemoteMatcher>,
        bytes: Arc<dyn BytesProvider>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            store,
            rows,
            matcher,
            bytes,
            notifier,
        }
    }

    /// Scan one hash. Only store failures are returned as errors; having no
    /// candidates, or none that can be scanned, is an inconclusive outcome.
    pub async fn scan(&self, hash: &str) -> Result<ScanOutcome, ScanError> {
        let previous = self
            .store
            .get(hash)
            .await?
            .map_or(MatchStatus::Unknown, |r| r.status);

        let mut warnings = Vec::new();
        let mut verdict = None;
        let mut candidates_seen = 0;

        let mut walk = self.rows.candidates_for_hash(hash);
        while let Some(candidate) = walk.next().await? {
            candidates_seen += 1;

            if !self.bytes.can_scan(&candidate) {
                let err = BytesLookupError::Unsupported(candidate.mime_type.clone());
                warnings.push(candidate_warning(&candidate, err));
                continue;
            }

            let scan_bytes = match self.bytes.fetch(&candidate).await {
                Ok(b) => b,
                Err(e) => {
                    warnings.push(candidate_warning(&candidate, e));
                    continue;
                }
            };

            match self
                .matcher
                .check(&scan_bytes.bytes, &scan_bytes.mime_type)
                .await
            {
                Ok(resp) if resp.is_ok() => {
                    verdict = Some(MatchStatus::from_verdict(resp.is_match));
                    break;
                }
                Ok(resp) => {
                    let err = MatcherError::Status {
                        code: resp.status,
                        raw_code: resp.raw_code,
                        description: resp.raw_body,
                    };
                    warnings.push(candidate_warning(&candidate, err));
                }
                Err(e) => warnings.push(candidate_warning(&candidate, e)),
            }
        }

        let status = match (previous, verdict) {
            (MatchStatus::Positive, Some(v)) if v != MatchStatus::Positive => {
                warn!(hash, verdict = %v, "keeping positive status despite a later verdict");
                MatchStatus::Positive
            }
            (_, Some(v)) => v,
            (p, None) => p,
        };

        self.store.upsert_status(hash, status, today()).await?;

        let mut notified = false;
        if status == MatchStatus::Positive && previous != MatchStatus::Positive {
            info!(hash, %previous, "hash transitioned to positive");
            match self.notifier.notify_positive(hash, None).await {
                Ok(()) => notified = true,
                Err(error) => warnings.push(ScanWarning {
                    candidate: None,
                    error,
                }),
            }
        }

        Ok(ScanOutcome {
            hash: hash.to_string(),
            previous,
            status,
            ok: verdict.is_some(),
            candidates_seen,
            warnings,
            notified,
        })
    }
}
