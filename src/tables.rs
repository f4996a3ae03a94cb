//! Physical layout of the three file tables.
//!
//! Each source table names its hash and timestamp columns differently
//! (`img_sha1` / `oi_sha1` / `fa_sha1`, and so on). [`columns`] is the static
//! lookup from [`SourceTable`] to those names; every query in
//! [`rows`](crate::rows) is built from it.
//!
//! Rows are decoded into the table-specific structs below and unioned by
//! [`FileRow`], which [`candidate::resolve`](crate::candidate::resolve) maps
//! onto the uniform [`FileCandidate`](crate::models::FileCandidate).

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::models::SourceTable;

/// Column names for one source table.
#[derive(Debug)]
pub struct TableColumns {
    pub table: &'static str,
    pub hash: &'static str,
    pub timestamp: &'static str,
    /// Unique column used to make the ordering total within one timestamp.
    pub tiebreak: &'static str,
    /// Comma-separated select list decoded by [`decode_row`].
    pub select: &'static str,
}

static CURRENT: TableColumns = TableColumns {
    table: "image",
    hash: "img_sha1",
    timestamp: "img_timestamp",
    tiebreak: "img_name",
    select: "img_name, img_size, img_width, img_height, img_major_mime, img_minor_mime, \
             img_timestamp, img_sha1",
};

static HISTORICAL: TableColumns = TableColumns {
    table: "oldimage",
    hash: "oi_sha1",
    timestamp: "oi_timestamp",
    tiebreak: "oi_archive_name",
    select: "oi_name, oi_archive_name, oi_size, oi_width, oi_height, oi_major_mime, \
             oi_minor_mime, oi_timestamp, oi_sha1, oi_deleted",
};

static DELETED: TableColumns = TableColumns {
    table: "filearchive",
    hash: "fa_sha1",
    timestamp: "fa_timestamp",
    tiebreak: "fa_id",
    select: "fa_id, fa_name, fa_storage_key, fa_size, fa_width, fa_height, fa_major_mime, \
             fa_minor_mime, fa_timestamp, fa_sha1, fa_deleted",
};

pub fn columns(table: SourceTable) -> &'static TableColumns {
    match table {
        SourceTable::Current => &CURRENT,
        SourceTable::HistoricalRevision => &HISTORICAL,
        SourceTable::Deleted => &DELETED,
    }
}

/// A row of `image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRow {
    pub name: String,
    pub size: i64,
    pub width: i64,
    pub height: i64,
    pub major_mime: String,
    pub minor_mime: String,
    pub timestamp: String,
    pub sha1: String,
}

/// A row of `oldimage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OldImageRow {
    pub name: String,
    pub archive_name: String,
    pub size: i64,
    pub width: i64,
    pub height: i64,
    pub major_mime: String,
    pub minor_mime: String,
    pub timestamp: String,
    pub sha1: String,
    /// Revision-deletion bitfield; non-zero means suppressed.
    pub deleted: i64,
}

/// A row of `filearchive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFileRow {
    pub id: i64,
    pub name: String,
    pub storage_key: Option<String>,
    pub size: i64,
    pub width: i64,
    pub height: i64,
    pub major_mime: String,
    pub minor_mime: String,
    pub timestamp: Option<String>,
    pub sha1: String,
    pub deleted: i64,
}

/// A raw row from any of the three tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRow {
    Current(ImageRow),
    HistoricalRevision(OldImageRow),
    Deleted(ArchivedFileRow),
}

impl FileRow {
    pub fn table(&self) -> SourceTable {
        match self {
            FileRow::Current(_) => SourceTable::Current,
            FileRow::HistoricalRevision(_) => SourceTable::HistoricalRevision,
            FileRow::Deleted(_) => SourceTable::Deleted,
        }
    }

    pub fn hash(&self) -> &str {
        match self {
            FileRow::Current(r) => &r.sha1,
            FileRow::HistoricalRevision(r) => &r.sha1,
            FileRow::Deleted(r) => &r.sha1,
        }
    }

    /// Pagination key. A missing timestamp sorts as the empty string, which
    /// matches `COALESCE(ts, '')` in the queries.
    pub fn sort_key(&self) -> &str {
        match self {
            FileRow::Current(r) => &r.timestamp,
            FileRow::HistoricalRevision(r) => &r.timestamp,
            FileRow::Deleted(r) => r.timestamp.as_deref().unwrap_or(""),
        }
    }
}

/// Decode a row selected with `columns(table).select`.
pub fn decode_row(table: SourceTable, row: &SqliteRow) -> Result<FileRow, sqlx::Error> {
    Ok(match table {
        SourceTable::Current => FileRow::Current(ImageRow {
            name: row.try_get("img_name")?,
            size: row.try_get("img_size")?,
            width: row.try_get("img_width")?,
            height: row.try_get("img_height")?,
            major_mime: row.try_get("img_major_mime")?,
            minor_mime: row.try_get("img_minor_mime")?,
            timestamp: row.try_get("img_timestamp")?,
            sha1: row.try_get("img_sha1")?,
        }),
        SourceTable::HistoricalRevision => FileRow::HistoricalRevision(OldImageRow {
            name: row.try_get("oi_name")?,
            archive_name: row.try_get("oi_archive_name")?,
            size: row.try_get("oi_size")?,
            width: row.try_get("oi_width")?,
            height: row.try_get("oi_height")?,
            major_mime: row.try_get("oi_major_mime")?,
            minor_mime: row.try_get("oi_minor_mime")?,
            timestamp: row.try_get("oi_timestamp")?,
            sha1: row.try_get("oi_sha1")?,
            deleted: row.try_get("oi_deleted")?,
        }),
        SourceTable::Deleted => FileRow::Deleted(ArchivedFileRow {
            id: row.try_get("fa_id")?,
            name: row.try_get("fa_name")?,
            storage_key: row.try_get("fa_storage_key")?,
            size: row.try_get("fa_size")?,
            width: row.try_get("fa_width")?,
            height: row.try_get("fa_height")?,
            major_mime: row.try_get("fa_major_mime")?,
            minor_mime: row.try_get("fa_minor_mime")?,
            timestamp: row.try_get("fa_timestamp")?,
            sha1: row.try_get("fa_sha1")?,
            deleted: row.try_get("fa_deleted")?,
        }),
    })
}
