//! # Failed Import Tracker
//!
//! Keeps one `failed_imports` row per path that could not be read.
//!
//! A path moves Untracked → Failed when extraction fails. On later runs it
//! either stays failed (reason and timestamp refreshed, never a second row)
//! or recovers: it imported cleanly, or it is gone from disk. Recovery is
//! confirmed against the comic table first and the filesystem second.
//!
//! The filesystem check compares the stored path's name exactly. On a
//! case-insensitive filesystem a plain existence check still finds a file
//! whose name changed only in case, so the old row would never clear; here a
//! case-only rename counts as the old path being gone and the row recovers.
//! The renamed file is tracked under its new name if it still fails. When
//! neither check confirms recovery, or the filesystem cannot be read, the row
//! is left alone.

use crate::error::Result;
use bridge_traits::storage::FileSystemAccess;
use core_library::repositories::{ComicRepository, FailedImportRepository};
use core_library::{FailedImport, LibraryId};
use core_metadata::ExtractionFailure;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What reconciliation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailedImportReport {
    pub created: u64,
    /// Still failing with a different reason
    pub updated: u64,
    pub recovered: u64,
}

/// Failure message with the archive path removed, cut to `max_len` chars
///
/// Extractors tend to echo the path back (`"Bad zip: (/lib/a.cbz)"`); the
/// row is already keyed by path, so only the cause is kept.
pub fn failure_reason(failure: &ExtractionFailure, max_len: usize) -> String {
    let path = failure.path.as_str();
    let mut reason = failure.message.clone();
    if !path.is_empty() {
        for wrapped in [
            format!("({})", path),
            format!("'{}'", path),
            format!("\"{}\"", path),
            path.to_string(),
        ] {
            reason = reason.replace(&wrapped, "");
        }
    }
    let reason = reason
        .trim()
        .trim_end_matches(|c: char| c == ':' || c == '-' || c == ',' || c.is_whitespace())
        .trim_start_matches(|c: char| c == ':' || c == '-' || c == ',' || c.is_whitespace());
    let reason = if reason.is_empty() {
        format!("{:?}", failure.kind)
    } else {
        reason.to_string()
    };
    reason.chars().take(max_len).collect()
}

/// Log an extraction failure at the level its kind calls for
pub fn log_failure(failure: &ExtractionFailure) {
    if failure.is_expected() {
        warn!(path = %failure.path, kind = ?failure.kind, "Could not import: {}", failure.message);
    } else {
        error!(path = %failure.path, kind = ?failure.kind, "Unexpected import failure: {}", failure.message);
    }
}

pub struct FailedImportTracker {
    failed: Arc<dyn FailedImportRepository>,
    comics: Arc<dyn ComicRepository>,
    fs: Arc<dyn FileSystemAccess>,
    reason_max_len: usize,
    batch_size: usize,
}

impl FailedImportTracker {
    pub fn new(
        failed: Arc<dyn FailedImportRepository>,
        comics: Arc<dyn ComicRepository>,
        fs: Arc<dyn FileSystemAccess>,
        reason_max_len: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            failed,
            comics,
            fs,
            reason_max_len,
            batch_size,
        }
    }

    /// Record this run's failures and forget recovered paths
    #[instrument(skip(self, failures), fields(failures = failures.len()))]
    pub async fn reconcile(
        &self,
        library_id: LibraryId,
        failures: &[ExtractionFailure],
        now: i64,
    ) -> Result<FailedImportReport> {
        let previous: HashMap<String, FailedImport> = self
            .failed
            .list(library_id)
            .await?
            .into_iter()
            .map(|row| (row.path.clone(), row))
            .collect();

        let mut report = FailedImportReport::default();
        let mut current: BTreeMap<String, FailedImport> = BTreeMap::new();
        for failure in failures {
            let reason = failure_reason(failure, self.reason_max_len);
            let created_at = match previous.get(&failure.path) {
                Some(row) => {
                    if row.reason != reason {
                        report.updated += 1;
                    }
                    row.created_at
                }
                None => now,
            };
            current.insert(
                failure.path.clone(),
                FailedImport {
                    library_id,
                    path: failure.path.clone(),
                    reason,
                    created_at,
                    updated_at: now,
                },
            );
        }
        // A path failing twice in one run counts once
        report.created = current
            .keys()
            .filter(|path| !previous.contains_key(*path))
            .count() as u64;

        if !current.is_empty() {
            let rows: Vec<FailedImport> = current.values().cloned().collect();
            self.failed.upsert(&rows, self.batch_size).await?;
        }

        let candidates: Vec<String> = previous
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();
        let recovered = self.recovered(&candidates).await?;
        if !recovered.is_empty() {
            report.recovered = self.failed.delete_by_paths(&recovered, self.batch_size).await?;
        }

        if report.created + report.updated + report.recovered > 0 {
            info!(
                created = report.created,
                updated = report.updated,
                recovered = report.recovered,
                "Failed imports reconciled"
            );
        }
        Ok(report)
    }

    /// Previously failed paths that now import or no longer exist
    async fn recovered(&self, candidates: &[String]) -> Result<Vec<String>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let imported = self.comics.ids_by_paths(candidates, self.batch_size).await?;

        let mut recovered = Vec::new();
        for path in candidates {
            if imported.contains_key(path) {
                recovered.push(path.clone());
                continue;
            }
            match self.fs.exists_exact_case(Path::new(path)).await {
                Ok(false) => recovered.push(path.clone()),
                Ok(true) => debug!(path = %path, "Failed import still present"),
                Err(err) => warn!(path = %path, error = %err, "Could not check failed import"),
            }
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::catalog;
    use bridge_desktop::TokioFileSystem;
    use core_metadata::FailureKind;

    fn failure(path: &str, message: &str) -> ExtractionFailure {
        ExtractionFailure::new(path, FailureKind::CorruptArchive, message)
    }

    #[test]
    fn test_reason_strips_path() {
        let f = failure("/lib/a.cbz", "Bad zip file: (/lib/a.cbz)");
        assert_eq!(failure_reason(&f, 255), "Bad zip file");

        let f = failure("/lib/a.cbz", "'/lib/a.cbz' - not a rar archive");
        assert_eq!(failure_reason(&f, 255), "not a rar archive");

        let f = failure("/lib/a.cbz", "/lib/a.cbz");
        assert_eq!(failure_reason(&f, 255), "CorruptArchive");
    }

    #[test]
    fn test_reason_is_truncated_on_char_boundary() {
        let f = failure("/lib/a.cbz", "ééééé");
        assert_eq!(failure_reason(&f, 3), "ééé");
    }

    fn tracker(
        catalog: &crate::test_support::Catalog,
        fs: Arc<dyn FileSystemAccess>,
    ) -> FailedImportTracker {
        FailedImportTracker::new(
            catalog.failed.clone(),
            catalog.comics.clone(),
            fs,
            255,
            100,
        )
    }

    #[tokio::test]
    async fn test_still_failing_keeps_one_row() {
        let catalog = catalog().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.cbz");
        std::fs::write(&path, b"junk").unwrap();
        let path = path.to_string_lossy().to_string();
        let tracker = tracker(&catalog, Arc::new(TokioFileSystem::new()));

        let first = tracker
            .reconcile(catalog.library_id, &[failure(&path, "Bad zip")], 10)
            .await
            .unwrap();
        assert_eq!(first.created, 1);

        let second = tracker
            .reconcile(catalog.library_id, &[failure(&path, "Truncated")], 20)
            .await
            .unwrap();
        assert_eq!(second, FailedImportReport { created: 0, updated: 1, recovered: 0 });

        let rows = catalog.failed.list(catalog.library_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reason, "Truncated");
        assert_eq!(rows[0].created_at, 10);
        assert_eq!(rows[0].updated_at, 20);
    }

    #[tokio::test]
    async fn test_vanished_path_recovers_and_present_path_stays() {
        let catalog = catalog().await;
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.cbz");
        std::fs::write(&present, b"junk").unwrap();
        let present = present.to_string_lossy().to_string();
        let gone = dir.path().join("gone.cbz").to_string_lossy().to_string();
        let tracker = tracker(&catalog, Arc::new(TokioFileSystem::new()));

        tracker
            .reconcile(
                catalog.library_id,
                &[failure(&present, "Bad zip"), failure(&gone, "Bad zip")],
                10,
            )
            .await
            .unwrap();

        let report = tracker.reconcile(catalog.library_id, &[], 20).await.unwrap();
        assert_eq!(report.recovered, 1);

        let rows = catalog.failed.list(catalog.library_id).await.unwrap();
        let paths: Vec<&str> = rows.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec![present.as_str()]);
    }

    #[tokio::test]
    async fn test_renamed_by_case_counts_as_gone() {
        let catalog = catalog().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Saga.cbz"), b"junk").unwrap();
        let old_casing = dir.path().join("saga.cbz").to_string_lossy().to_string();
        let tracker = tracker(&catalog, Arc::new(TokioFileSystem::new()));

        tracker
            .reconcile(catalog.library_id, &[failure(&old_casing, "Bad zip")], 10)
            .await
            .unwrap();
        let report = tracker.reconcile(catalog.library_id, &[], 20).await.unwrap();

        assert_eq!(report.recovered, 1);
        assert!(catalog.failed.list(catalog.library_id).await.unwrap().is_empty());
    }
}
