//! Storage and File System Abstractions
//!
//! Provides the filesystem queries the synchronization core makes about
//! library paths. The core never writes to the library tree.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn still_there(fs: &dyn FileSystemAccess, path: &Path) -> Result<bool> {
///     fs.exists_exact_case(path).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    ///
    /// On case-insensitive filesystems this reports `true` for a path whose
    /// casing differs from the entry on disk.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Check that an entry with exactly this file name exists in its parent
    ///
    /// Lists the parent directory and compares names byte for byte, so a
    /// renamed-by-case file is reported as absent even where the platform's
    /// own lookup would match it case-insensitively.
    async fn exists_exact_case(&self, path: &Path) -> Result<bool> {
        if !self.exists(path).await? {
            return Ok(false);
        }
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return Ok(true);
        };
        let entries = self.list_directory(parent).await?;
        Ok(entries
            .iter()
            .any(|entry| entry.file_name() == Some(name)))
    }
}
