//! Raw comic metadata vocabulary
//!
//! The fixed set of attribute names an extractor may report for one archive.
//! Values arrive as the archive stores them; [`MetadataNormalizer`] trims,
//! coerces and decomposes them.
//!
//! [`MetadataNormalizer`]: crate::normalizer::MetadataNormalizer

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// External identifier as reported by the archive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIdentifier {
    /// Catalog the key belongs to, e.g. `comicvine`
    pub source: String,
    /// Kind of object keyed, e.g. `issue` or `series`
    #[serde(default)]
    pub id_type: String,
    pub key: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// One level of the publisher → imprint → series → volume chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawGroup {
    pub name: Option<String>,
    pub identifier: Option<RawIdentifier>,
    /// Volume count on a series, issue count on a volume
    pub count: Option<i64>,
}

impl RawGroup {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Name-keyed entity that may carry an identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntity {
    pub name: String,
    #[serde(default)]
    pub identifier: Option<RawIdentifier>,
}

impl RawEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUniverse {
    pub name: String,
    #[serde(default)]
    pub designation: Option<String>,
    #[serde(default)]
    pub identifier: Option<RawIdentifier>,
}

/// Creator credit; the role is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCredit {
    pub person: RawEntity,
    #[serde(default)]
    pub role: Option<RawEntity>,
}

/// Story arc membership with an optional position in the arc
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStoryArc {
    pub arc: RawEntity,
    #[serde(default)]
    pub number: Option<i64>,
}

/// Everything an extractor reports for one archive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawComicMetadata {
    pub publisher: RawGroup,
    pub imprint: RawGroup,
    pub series: RawGroup,
    pub volume: RawGroup,

    pub age_rating: Option<String>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub original_format: Option<String>,
    pub scan_info: Option<String>,
    pub tagger: Option<String>,

    pub characters: Vec<RawEntity>,
    pub genres: Vec<RawEntity>,
    pub locations: Vec<RawEntity>,
    pub series_groups: Vec<RawEntity>,
    pub stories: Vec<RawEntity>,
    pub tags: Vec<RawEntity>,
    pub teams: Vec<RawEntity>,
    pub universes: Vec<RawUniverse>,
    pub credits: Vec<RawCredit>,
    pub story_arcs: Vec<RawStoryArc>,
    pub identifiers: Vec<RawIdentifier>,

    /// Name of the comic's main character; looked up, never created
    pub main_character: Option<String>,
    /// Name of the comic's main team; looked up, never created
    pub main_team: Option<String>,

    pub name: Option<String>,
    pub issue_number: Option<f64>,
    pub issue_suffix: Option<String>,
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub day: Option<i64>,
    pub page_count: Option<i64>,
    pub summary: Option<String>,
    pub notes: Option<String>,
    pub critical_rating: Option<f64>,
    pub reading_direction: Option<String>,
    pub monochrome: Option<bool>,
    pub file_type: Option<String>,

    /// Archive size in bytes
    pub size: i64,
    /// Archive modification time, unix seconds
    pub mtime: Option<i64>,
}

impl RawComicMetadata {
    /// Parse metadata serialized as JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_fills_defaults() {
        let raw = RawComicMetadata::from_json(
            r#"{
                "series": {"name": "Saga", "count": 2},
                "tags": [{"name": "space"}],
                "credits": [{"person": {"name": "Fiona Staples"}, "role": {"name": "Artist"}}],
                "identifiers": [{"source": "comicvine", "id_type": "issue", "key": "4000-1"}]
            }"#,
        )
        .unwrap();

        assert_eq!(raw.series.name.as_deref(), Some("Saga"));
        assert_eq!(raw.series.count, Some(2));
        assert!(raw.publisher.name.is_none());
        assert_eq!(raw.tags, vec![RawEntity::new("space")]);
        assert_eq!(raw.credits[0].role.as_ref().unwrap().name, "Artist");
        assert!(raw.identifiers[0].url.is_none());
        assert_eq!(raw.size, 0);
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        assert!(RawComicMetadata::from_json("{\"series\": 3}").is_err());
    }
}
