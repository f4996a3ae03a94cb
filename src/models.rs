//! Core data models used throughout the scan pipeline.
//!
//! A [`MatchRecord`] is the persisted scan state of one content hash. A
//! [`FileCandidate`] is an ephemeral view over one stored file revision that
//! carries that hash; many candidates map to a single record.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::ScanError;

/// Tri-state verdict for a content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    /// Never scanned, or every scan so far was inconclusive.
    Unknown,
    Negative,
    Positive,
}

impl MatchStatus {
    /// Decode the nullable `mms_is_match` column.
    pub fn from_db(value: Option<i64>) -> Self {
        match value {
            None => MatchStatus::Unknown,
            Some(0) => MatchStatus::Negative,
            Some(_) => MatchStatus::Positive,
        }
    }

    /// Encode for the nullable `mms_is_match` column.
    pub fn to_db(self) -> Option<i64> {
        match self {
            MatchStatus::Unknown => None,
            MatchStatus::Negative => Some(0),
            MatchStatus::Positive => Some(1),
        }
    }

    pub fn from_verdict(is_match: bool) -> Self {
        if is_match {
            MatchStatus::Positive
        } else {
            MatchStatus::Negative
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Unknown => "unknown",
            MatchStatus::Negative => "negative",
            MatchStatus::Positive => "positive",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(MatchStatus::Unknown),
            "negative" => Ok(MatchStatus::Negative),
            "positive" => Ok(MatchStatus::Positive),
            other => Err(format!(
                "unknown match status '{}'. Must be unknown, negative, or positive.",
                other
            )),
        }
    }
}

/// One row of the scan table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRecord {
    pub hash: String,
    pub status: MatchStatus,
    /// `None` until the first scan attempt completes.
    pub last_checked: Option<NaiveDate>,
}

impl MatchRecord {
    pub fn unscanned(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            status: MatchStatus::Unknown,
            last_checked: None,
        }
    }
}

/// The three physical sources of stored file revisions.
///
/// Declaration order is the scan priority: live files first, then older
/// revisions, then deleted files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SourceTable {
    Current,
    HistoricalRevision,
    Deleted,
}

impl SourceTable {
    pub const ALL: [SourceTable; 3] = [
        SourceTable::Current,
        SourceTable::HistoricalRevision,
        SourceTable::Deleted,
    ];

    /// Physical table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            SourceTable::Current => "image",
            SourceTable::HistoricalRevision => "oldimage",
            SourceTable::Deleted => "filearchive",
        }
    }

    /// Parse a physical table name. Fails closed on anything unrecognised.
    pub fn from_table_name(name: &str) -> Result<Self, ScanError> {
        match name {
            "image" => Ok(SourceTable::Current),
            "oldimage" => Ok(SourceTable::HistoricalRevision),
            "filearchive" => Ok(SourceTable::Deleted),
            other => Err(ScanError::InvalidTable(other.to_string())),
        }
    }
}

impl fmt::Display for SourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// A uniform view over one stored revision from any of the source tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub source_table: SourceTable,
    pub hash: String,
    /// Display name (page title without namespace).
    pub name: String,
    /// Upload timestamp (`YYYYMMDDHHMMSS`), absent for some deleted files.
    pub timestamp: Option<String>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    /// True for rows from the deleted-files table and for suppressed revisions.
    pub deleted: bool,
    /// Location of the stored bytes relative to the table's storage area:
    /// the file name for current files, the archive name for old revisions,
    /// and the storage key for deleted files.
    pub storage_key: Option<String>,
}

impl FileCandidate {
    /// Upload time formatted for humans, if the timestamp parses.
    pub fn display_timestamp(&self) -> Option<String> {
        let ts = self.timestamp.as_deref()?;
        chrono::NaiveDateTime::parse_from_str(ts, "%Y%m%d%H%M%S")
            .ok()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    }
}
