//! Per-scan change set handed to the pipeline

use core_library::LibraryId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Filesystem changes detected by one library scan
///
/// Paths are absolute. Moves map the old path to the new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportTask {
    pub library_id: LibraryId,
    pub files_created: BTreeSet<String>,
    pub files_modified: BTreeSet<String>,
    pub files_deleted: BTreeSet<String>,
    pub files_moved: BTreeMap<String, String>,
    /// Folders that appeared, possibly still empty
    pub folders_created: BTreeSet<String>,
    pub folders_deleted: BTreeSet<String>,
    pub folders_moved: BTreeMap<String, String>,
    pub covers_created: BTreeSet<String>,
    pub covers_modified: BTreeSet<String>,
    pub covers_deleted: BTreeSet<String>,
    pub covers_moved: BTreeMap<String, String>,
    /// Re-extract every comic already in the library
    pub force_import_metadata: bool,
}

impl ImportTask {
    pub fn new(library_id: LibraryId) -> Self {
        Self {
            library_id,
            ..Self::default()
        }
    }

    /// No change of any kind and no forced re-import
    pub fn is_empty(&self) -> bool {
        !self.force_import_metadata
            && self.files_created.is_empty()
            && self.files_modified.is_empty()
            && self.files_deleted.is_empty()
            && self.files_moved.is_empty()
            && self.folders_created.is_empty()
            && self.folders_deleted.is_empty()
            && self.folders_moved.is_empty()
            && !self.has_cover_changes()
    }

    pub fn has_cover_changes(&self) -> bool {
        !(self.covers_created.is_empty()
            && self.covers_modified.is_empty()
            && self.covers_deleted.is_empty()
            && self.covers_moved.is_empty())
    }

    /// Comic paths to extract before any forced re-import is added
    ///
    /// Created and modified files, minus files deleted in the same scan.
    pub fn paths_to_extract(&self) -> BTreeSet<String> {
        self.files_created
            .iter()
            .chain(self.files_modified.iter())
            .filter(|path| !self.files_deleted.contains(*path))
            .cloned()
            .collect()
    }
}
