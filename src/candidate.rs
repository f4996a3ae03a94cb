//! Candidate resolution: raw table rows to [`FileCandidate`]s.
//!
//! Pure mapping with no I/O. All three row shapes funnel through
//! [`resolve`], which switches on the row's source table.

use crate::models::FileCandidate;
use crate::tables::FileRow;

fn mime(major: &str, minor: &str) -> String {
    format!("{}/{}", major, minor)
}

fn non_negative(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

pub fn resolve(row: &FileRow) -> FileCandidate {
    let source_table = row.table();
    match row {
        FileRow::Current(r) => FileCandidate {
            source_table,
            hash: r.sha1.clone(),
            name: r.name.clone(),
            timestamp: Some(r.timestamp.clone()),
            mime_type: mime(&r.major_mime, &r.minor_mime),
            width: non_negative(r.width),
            height: non_negative(r.height),
            size: r.size.max(0) as u64,
            deleted: false,
            storage_key: Some(r.name.clone()),
        },
        FileRow::HistoricalRevision(r) => FileCandidate {
            source_table,
            hash: r.sha1.clone(),
            name: r.name.clone(),
            timestamp: Some(r.timestamp.clone()),
            mime_type: mime(&r.major_mime, &r.minor_mime),
            width: non_negative(r.width),
            height: non_negative(r.height),
            size: r.size.max(0) as u64,
            deleted: r.deleted != 0,
            storage_key: Some(r.archive_name.clone()).filter(|k| !k.is_empty()),
        },
        FileRow::Deleted(r) => FileCandidate {
            source_table,
            hash: r.sha1.clone(),
            name: r.name.clone(),
            timestamp: r.timestamp.clone().filter(|t| !t.is_empty()),
            mime_type: mime(&r.major_mime, &r.minor_mime),
            width: non_negative(r.width),
            height: non_negative(r.height),
            size: r.size.max(0) as u64,
            deleted: true,
            storage_key: r.storage_key.clone().filter(|k| !k.is_empty()),
        },
    }
}
