//! Archive metadata extraction
//!
//! The pipeline only sees the [`ComicExtractor`] seam: one call per archive
//! path, returning either the archive's [`RawComicMetadata`] or a classified
//! [`ExtractionFailure`]. Failures are never fatal to an import run; they are
//! recorded as failed imports.
//!
//! ## Sidecar extraction
//!
//! [`SidecarExtractor`] reads metadata serialized as JSON next to the archive
//! (`Saga 001.cbz` → `Saga 001.cbz.json`) and takes size and modification
//! time from the archive itself. An archive without a sidecar imports with
//! empty metadata.
//!
//! ```ignore
//! use core_metadata::extractor::{ComicExtractor, SidecarExtractor};
//!
//! let metadata = SidecarExtractor::new().extract(Path::new("/lib/Saga 001.cbz")).await?;
//! ```

use crate::error::MetadataError;
use crate::raw::RawComicMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::debug;

/// Archive extensions the importer accepts
pub const COMIC_EXTENSIONS: &[&str] = &["cbz", "cbr", "cb7", "cbt", "pdf"];

/// Classification of an extraction failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Not a comic archive format the extractor understands
    UnsupportedFormat,
    /// Archive or embedded metadata could not be decoded
    CorruptArchive,
    /// The operating system refused the read
    Io,
    /// Anything else; indicates an extractor bug
    Unexpected,
}

impl FailureKind {
    /// Expected failures are routine for a real library and log at `warn`
    pub fn is_expected(&self) -> bool {
        !matches!(self, FailureKind::Unexpected)
    }
}

/// Why one archive could not be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub path: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ExtractionFailure {
    pub fn new(path: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn is_expected(&self) -> bool {
        self.kind.is_expected()
    }

    fn from_error(path: &Path, error: MetadataError) -> Self {
        let kind = match &error {
            MetadataError::Json(_) => FailureKind::CorruptArchive,
            MetadataError::Io(_) => FailureKind::Io,
        };
        Self::new(path.to_string_lossy(), kind, error.to_string())
    }
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {} ({})", self.kind, self.message, self.path)
    }
}

impl std::error::Error for ExtractionFailure {}

/// Reads one archive's metadata
#[async_trait]
pub trait ComicExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<RawComicMetadata, ExtractionFailure>;
}

/// Extractor reading JSON sidecar files
#[derive(Debug, Clone, Default)]
pub struct SidecarExtractor;

impl SidecarExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Sidecar location for an archive
    pub fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".json");
        PathBuf::from(name)
    }

    fn is_supported(path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| COMIC_EXTENSIONS.contains(&ext.as_str()))
    }

    async fn read(&self, path: &Path) -> Result<RawComicMetadata, MetadataError> {
        let stat = fs::metadata(path).await?;

        let mut raw = match fs::read_to_string(Self::sidecar_path(path)).await {
            Ok(json) => RawComicMetadata::from_json(&json)?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No metadata sidecar");
                RawComicMetadata::default()
            }
            Err(err) => return Err(err.into()),
        };

        raw.size = stat.len() as i64;
        raw.mtime = stat
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        if raw.file_type.is_none() {
            raw.file_type = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_uppercase());
        }
        Ok(raw)
    }
}

#[async_trait]
impl ComicExtractor for SidecarExtractor {
    async fn extract(&self, path: &Path) -> Result<RawComicMetadata, ExtractionFailure> {
        if !Self::is_supported(path) {
            return Err(ExtractionFailure::new(
                path.to_string_lossy(),
                FailureKind::UnsupportedFormat,
                "Not a comic archive",
            ));
        }
        self.read(path)
            .await
            .map_err(|err| ExtractionFailure::from_error(path, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub Extractor {}

        #[async_trait]
        impl ComicExtractor for Extractor {
            async fn extract(&self, path: &Path) -> Result<RawComicMetadata, ExtractionFailure>;
        }
    }

    #[test]
    fn test_expected_kinds() {
        assert!(FailureKind::UnsupportedFormat.is_expected());
        assert!(FailureKind::CorruptArchive.is_expected());
        assert!(FailureKind::Io.is_expected());
        assert!(!FailureKind::Unexpected.is_expected());
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            SidecarExtractor::sidecar_path(Path::new("/lib/Saga 001.cbz")),
            PathBuf::from("/lib/Saga 001.cbz.json")
        );
    }

    #[tokio::test]
    async fn test_sidecar_metadata_and_stat() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("saga.cbz");
        let bytes = b"PK\x03\x04 not really zipped";
        std::fs::write(&archive, bytes).unwrap();
        std::fs::write(
            SidecarExtractor::sidecar_path(&archive),
            r#"{"series": {"name": "Saga"}, "issue_number": 1.0}"#,
        )
        .unwrap();

        let raw = SidecarExtractor::new().extract(&archive).await.unwrap();
        assert_eq!(raw.series.name.as_deref(), Some("Saga"));
        assert_eq!(raw.size, bytes.len() as i64);
        assert!(raw.mtime.is_some());
        assert_eq!(raw.file_type.as_deref(), Some("CBZ"));
    }

    #[tokio::test]
    async fn test_missing_sidecar_is_empty_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bare.cbr");
        std::fs::write(&archive, b"Rar!").unwrap();

        let raw = SidecarExtractor::new().extract(&archive).await.unwrap();
        assert!(raw.series.name.is_none());
        assert_eq!(raw.size, 4);
    }

    #[tokio::test]
    async fn test_failure_classification() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = SidecarExtractor::new();

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, b"hello").unwrap();
        let err = extractor.extract(&text).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::UnsupportedFormat);

        let corrupt = dir.path().join("broken.cbz");
        std::fs::write(&corrupt, b"PK").unwrap();
        std::fs::write(SidecarExtractor::sidecar_path(&corrupt), b"{not json").unwrap();
        let err = extractor.extract(&corrupt).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::CorruptArchive);
        assert!(err.path.ends_with("broken.cbz"));

        let missing = dir.path().join("gone.cbz");
        let err = extractor.extract(&missing).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Io);
    }

    #[tokio::test]
    async fn test_extractor_is_mockable() {
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().returning(|path| {
            Err(ExtractionFailure::new(
                path.to_string_lossy(),
                FailureKind::Unexpected,
                "boom",
            ))
        });

        let err = extractor.extract(Path::new("/lib/a.cbz")).await.unwrap_err();
        assert!(!err.is_expected());
        assert_eq!(err.to_string(), "Unexpected: boom (/lib/a.cbz)");
    }
}
