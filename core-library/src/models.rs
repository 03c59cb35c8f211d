//! Domain models for the comic catalog
//!
//! Rows the importer persists besides the descriptor-driven relation tables:
//! libraries, comics, folders, custom covers, failed imports and search
//! documents.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a library
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LibraryId(pub i64);

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a comic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComicId(pub i64);

impl fmt::Display for ComicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Sortable names
// =============================================================================

const LEADING_ARTICLES: &[&str] = &["the ", "a ", "an "];

/// Derived sortable name: lowercased, whitespace collapsed, leading English
/// article dropped.
///
/// Custom covers are matched to groups by comparing this value, so a cover
/// file named `The Sandman.jpg` matches series `The Sandman` and `Sandman`.
pub fn sort_name(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    let lowered = collapsed.to_lowercase();
    for article in LEADING_ARTICLES {
        if let Some(rest) = lowered.strip_prefix(article) {
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    lowered
}

// =============================================================================
// Domain Models
// =============================================================================

/// Library root registered for scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub path: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Reading direction of a comic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadingDirection {
    #[default]
    Ltr,
    Rtl,
    Ttb,
    Btt,
}

impl ReadingDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingDirection::Ltr => "ltr",
            ReadingDirection::Rtl => "rtl",
            ReadingDirection::Ttb => "ttb",
            ReadingDirection::Btt => "btt",
        }
    }

    /// Parse a stored or extracted value; unknown values read as left-to-right
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "rtl" | "right-to-left" | "yes" => ReadingDirection::Rtl,
            "ttb" | "top-to-bottom" => ReadingDirection::Ttb,
            "btt" | "bottom-to-top" => ReadingDirection::Btt,
            _ => ReadingDirection::Ltr,
        }
    }
}

/// Comic row as the importer writes it
///
/// Every field here is derived from disk on each import; `main_character_id`
/// and `main_team_id` are written separately during linking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comic {
    pub library_id: LibraryId,
    pub path: String,
    pub parent_folder_id: Option<i64>,
    pub publisher_id: i64,
    pub imprint_id: i64,
    pub series_id: i64,
    pub volume_id: i64,
    pub age_rating_id: Option<i64>,
    pub country_id: Option<i64>,
    pub language_id: Option<i64>,
    pub original_format_id: Option<i64>,
    pub scan_info_id: Option<i64>,
    pub tagger_id: Option<i64>,
    pub name: Option<String>,
    pub issue_number: Option<f64>,
    pub issue_suffix: Option<String>,
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub day: Option<i64>,
    pub page_count: i64,
    pub summary: Option<String>,
    pub notes: Option<String>,
    pub critical_rating: Option<f64>,
    pub reading_direction: ReadingDirection,
    pub monochrome: bool,
    pub file_type: Option<String>,
    pub size: i64,
    pub mtime: Option<i64>,
    pub sort_name: String,
}

impl Comic {
    /// Validate comic data before persisting
    pub fn validate(&self) -> Result<(), String> {
        if self.path.trim().is_empty() {
            return Err("Comic path cannot be empty".to_string());
        }

        if self.page_count < 0 {
            return Err("Page count cannot be negative".to_string());
        }

        if let Some(month) = self.month {
            if !(1..=12).contains(&month) {
                return Err(format!("Comic month {} is out of valid range", month));
            }
        }

        if let Some(day) = self.day {
            if !(1..=31).contains(&day) {
                return Err(format!("Comic day {} is out of valid range", day));
            }
        }

        Ok(())
    }
}

/// Comic as read back from the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct StoredComic {
    pub id: ComicId,
    pub comic: Comic,
    pub main_character_id: Option<i64>,
    pub main_team_id: Option<i64>,
}

/// Folder row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub library_id: LibraryId,
    pub path: String,
    pub name: String,
    pub sort_name: String,
    pub parent_folder_id: Option<i64>,
}

/// Folder as read back from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFolder {
    pub id: i64,
    pub folder: Folder,
}

/// Group level a custom cover applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverGroup {
    Publishers,
    Imprints,
    Series,
    Volumes,
}

impl CoverGroup {
    /// Table the cover's group rows live in; also the cover directory name
    pub fn table(&self) -> &'static str {
        match self {
            CoverGroup::Publishers => "publishers",
            CoverGroup::Imprints => "imprints",
            CoverGroup::Series => "series",
            CoverGroup::Volumes => "volumes",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "publishers" => Some(CoverGroup::Publishers),
            "imprints" => Some(CoverGroup::Imprints),
            "series" => Some(CoverGroup::Series),
            "volumes" => Some(CoverGroup::Volumes),
            _ => None,
        }
    }

    /// Group and sort key of a cover file, read from its parent directory
    /// name and file stem
    ///
    /// `/lib/covers/series/The Sandman.jpg` is `(Series, "sandman")`.
    pub fn classify(path: &str) -> Option<(CoverGroup, String)> {
        let path = Path::new(path);
        let group = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|dir| CoverGroup::from_dir_name(&dir.to_string_lossy()))?;
        let stem = path.file_stem()?.to_string_lossy();
        Some((group, sort_name(&stem)))
    }

    pub fn all() -> [CoverGroup; 4] {
        [
            CoverGroup::Publishers,
            CoverGroup::Imprints,
            CoverGroup::Series,
            CoverGroup::Volumes,
        ]
    }
}

/// Custom cover image for a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomCover {
    pub library_id: LibraryId,
    pub path: String,
    pub group: CoverGroup,
    pub sort_name: String,
    pub size: i64,
    pub mtime: Option<i64>,
}

/// Path that could not be imported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedImport {
    pub library_id: LibraryId,
    pub path: String,
    pub reason: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Search document columns, in table order
pub const SEARCH_COLUMNS: &[&str] = &[
    "publisher",
    "imprint",
    "series",
    "volume",
    "name",
    "issue",
    "summary",
    "age_rating",
    "country",
    "language",
    "original_format",
    "scan_info",
    "tagger",
    "characters",
    "credits",
    "genres",
    "identifiers",
    "locations",
    "series_groups",
    "stories",
    "story_arcs",
    "tags",
    "teams",
    "universes",
];

/// Denormalized full-text projection of one comic
///
/// `columns` holds one value per entry of [`SEARCH_COLUMNS`]; multi-valued
/// relations are their labels sorted and joined with `", "`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub comic_id: ComicId,
    pub columns: Vec<String>,
}

impl SearchDocument {
    pub fn new(comic_id: ComicId) -> Self {
        Self {
            comic_id,
            columns: vec![String::new(); SEARCH_COLUMNS.len()],
        }
    }

    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        if let Some(index) = SEARCH_COLUMNS.iter().position(|c| *c == column) {
            self.columns[index] = value.into();
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        SEARCH_COLUMNS
            .iter()
            .position(|c| *c == column)
            .map(|index| self.columns[index].as_str())
    }
}

/// Join relation labels the way search documents store them
pub fn join_labels<I, S>(labels: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut labels: Vec<String> = labels
        .into_iter()
        .map(|l| l.as_ref().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    labels.sort();
    labels.dedup();
    labels.join(", ")
}
