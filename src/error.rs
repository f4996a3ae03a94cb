//! Error taxonomy for the scan pipeline.
//!
//! Per-candidate failures ([`MatcherError`], [`BytesLookupError`]) are
//! recoverable: the scanner records them as warnings and moves on to the next
//! candidate. [`ScanError::Store`] is an infrastructure failure and
//! propagates to the batch driver.

use thiserror::Error;

/// Errors surfaced by the pipeline components.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid table: {0}")]
    InvalidTable(String),

    #[error("Remote matcher error: {0}")]
    RemoteMatcher(#[from] MatcherError),

    #[error("Bytes lookup error: {0}")]
    BytesLookup(#[from] BytesLookupError),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Notification delivery failed for {hash}: {reason}")]
    NotifyDelivery { hash: String, reason: String },

    #[error("Refusing to notify for {hash}: match status is {status}, not positive")]
    NotPositive { hash: String, status: String },

    #[error("Scan worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Failures from the remote hash-matching service.
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("service returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("service returned status {code:?} ({raw_code}): {description}")]
    Status {
        code: crate::matcher::StatusCode,
        raw_code: i64,
        description: String,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("matcher not configured: {0}")]
    NotConfigured(String),
}

/// Failures producing scannable bytes for a candidate.
#[derive(Debug, Error)]
pub enum BytesLookupError {
    #[error("{width}x{height} is below the minimum dimension of {min}px")]
    TooSmall { width: u32, height: u32, min: u32 },

    #[error("{size} bytes exceeds the limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("unsupported MIME type {0} and no thumbnail can be rendered")]
    Unsupported(String),

    #[error("lookup failed: {0}")]
    LookupFailed(String),
}
