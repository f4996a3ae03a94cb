//! Scannable bytes for file candidates.
//!
//! The matcher accepts a handful of raster formats. Files in those formats
//! are sent as a thumbnail when one has been rendered, falling back to the
//! original. Vector and document formats the wiki renders to PNG
//! thumbnails (SVG, PDF, ...) can only be scanned through a thumbnail.
//!
//! Upload layout under `media.root`:
//!
//! ```text
//! {root}/{name}                                   current originals
//! {root}/archive/{archive_name}                   historical originals
//! {root}/deleted/{storage_key}                    deleted originals
//! {root}/thumb/{name}/{width}px-{name}            current thumbnails
//! {root}/thumb/archive/{archive_name}/{width}px-{name}
//! ```
//!
//! Thumbnails of non-raster files carry an extra `.png` suffix.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::config::MediaConfig;
use crate::error::BytesLookupError;
use crate::models::{FileCandidate, SourceTable};

/// MIME types the matcher accepts directly.
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/tiff",
];

/// MIME types that are only scannable through a rendered PNG thumbnail.
pub const THUMBNAIL_ONLY_MIME_TYPES: &[&str] = &[
    "image/svg+xml",
    "image/webp",
    "application/pdf",
    "image/vnd.djvu",
    "image/x-xcf",
    "image/heic",
];

pub fn is_supported(mime: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime.to_lowercase().as_str())
}

/// True if the file can be sent to the matcher, directly or via thumbnail.
pub fn is_scannable(mime: &str) -> bool {
    is_supported(mime) || THUMBNAIL_ONLY_MIME_TYPES.contains(&mime.to_lowercase().as_str())
}

/// Bytes ready for the matcher.
#[derive(Debug, Clone)]
pub struct ScanBytes {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub from_thumbnail: bool,
}

/// Produces scannable bytes for a candidate.
#[async_trait]
pub trait BytesProvider: Send + Sync {
    /// Whether `candidate` is worth attempting at all.
    fn can_scan(&self, candidate: &FileCandidate) -> bool {
        is_scannable(&candidate.mime_type)
    }

    async fn fetch(&self, candidate: &FileCandidate) -> Result<ScanBytes, BytesLookupError>;
}

/// [`BytesProvider`] reading the wiki's upload directory.
pub struct FilesystemBytesProvider {
    root: PathBuf,
    thumbnail_width: u32,
    min_dimension: u32,
    max_bytes: u64,
}

impl FilesystemBytesProvider {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            root: config.root.clone(),
            thumbnail_width: config.thumbnail_width,
            min_dimension: config.min_dimension,
            max_bytes: config.max_bytes,
        }
    }

    fn original_path(&self, candidate: &FileCandidate) -> Option<PathBuf> {
        let key = candidate.storage_key.as_deref()?;
        Some(match candidate.source_table {
            SourceTable::Current => self.root.join(key),
            SourceTable::HistoricalRevision => self.root.join("archive").join(key),
            SourceTable::Deleted => self.root.join("deleted").join(key),
        })
    }

    fn thumbnail_path(&self, candidate: &FileCandidate) -> Option<PathBuf> {
        let key = candidate.storage_key.as_deref()?;
        let dir = match candidate.source_table {
            SourceTable::Current => self.root.join("thumb").join(key),
            SourceTable::HistoricalRevision => self.root.join("thumb").join("archive").join(key),
            SourceTable::Deleted => return None,
        };
        let mut file = format!("{}px-{}", self.thumbnail_width, candidate.name);
        if !is_supported(&candidate.mime_type) {
            file.push_str(".png");
        }
        Some(dir.join(file))
    }

    async fn read(&self, path: &PathBuf) -> Result<Option<Vec<u8>>, BytesLookupError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BytesLookupError::LookupFailed(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn check_size(&self, bytes: &[u8]) -> Result<(), BytesLookupError> {
        let size = bytes.len() as u64;
        if size > self.max_bytes {
            return Err(BytesLookupError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BytesProvider for FilesystemBytesProvider {
    async fn fetch(&self, candidate: &FileCandidate) -> Result<ScanBytes, BytesLookupError> {
        if !is_scannable(&candidate.mime_type) {
            return Err(BytesLookupError::Unsupported(candidate.mime_type.clone()));
        }
        if candidate.width < self.min_dimension || candidate.height < self.min_dimension {
            return Err(BytesLookupError::TooSmall {
                width: candidate.width,
                height: candidate.height,
                min: self.min_dimension,
            });
        }

        if let Some(path) = self.thumbnail_path(candidate) {
            if let Some(bytes) = self.read(&path).await? {
                let mime = mime_guess::from_path(&path)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string();
                if is_supported(&mime) {
                    self.check_size(&bytes)?;
                    debug!(name = %candidate.name, path = %path.display(), "using thumbnail");
                    return Ok(ScanBytes {
                        bytes,
                        mime_type: mime,
                        from_thumbnail: true,
                    });
                }
            }
        }

        if !is_supported(&candidate.mime_type) {
            return Err(BytesLookupError::LookupFailed(format!(
                "no rendered thumbnail for {} ({})",
                candidate.name, candidate.mime_type
            )));
        }

        let path = self.original_path(candidate).ok_or_else(|| {
            BytesLookupError::LookupFailed(format!("{} has no storage key", candidate.name))
        })?;
        let bytes = self.read(&path).await?.ok_or_else(|| {
            BytesLookupError::LookupFailed(format!("{} not found", path.display()))
        })?;
        self.check_size(&bytes)?;
        Ok(ScanBytes {
            bytes,
            mime_type: candidate.mime_type.clone(),
            from_thumbnail: false,
        })
    }
}
