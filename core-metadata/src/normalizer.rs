//! # Metadata Normalizer
//!
//! Turns raw per-archive metadata into canonical relation tuples.
//!
//! For every archive added, the normalizer returns a [`NormalizedComic`]
//! (group keys, simple foreign keys, many-to-many target sets, scalars,
//! ancestor folders, protagonist names and search labels) and accumulates
//! one [`ProposalSet`] per relation across the whole run.
//!
//! ## Keys
//!
//! - Group levels are keyed by every ancestor's name followed by their own, so
//!   `Saga` under `Image` and `Saga` under `Marvel` are distinct series.
//!   Missing group names become the empty-string sentinel.
//! - Composite relations decompose into their linked entity names plus an
//!   optional extra key. Sub-entities (credit persons and roles, story arcs,
//!   identifier sources, identifiers) are proposed as rows of their own.
//! - An identifier's url is an extra, never part of its key.
//!
//! ## Counts
//!
//! Count-bearing extras (series volume count, volume issue count) carry the
//! running maximum seen for their key within the run.

use crate::raw::{
    RawComicMetadata, RawCredit, RawEntity, RawGroup, RawIdentifier, RawStoryArc, RawUniverse,
};
use core_library::models::{join_labels, sort_name, ReadingDirection};
use core_library::relations::{
    ExtraKind, ExtraTuple, ExtraValue, IdentifierKey, KeyTuple, KeyValue, Relation,
};
use core_library::repositories::ancestor_paths;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Every extra tuple proposed for each key tuple of one relation
pub type ProposalSet = BTreeMap<KeyTuple, BTreeSet<ExtraTuple>>;

/// Proposal sets of every relation touched in a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proposals {
    sets: BTreeMap<Relation, ProposalSet>,
}

impl Proposals {
    pub fn get(&self, relation: Relation) -> Option<&ProposalSet> {
        self.sets.get(&relation)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Relation, &ProposalSet)> {
        self.sets.iter().map(|(relation, set)| (*relation, set))
    }

    /// Total distinct key tuples across relations
    pub fn len(&self) -> usize {
        self.sets.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(BTreeMap::is_empty)
    }

    pub fn insert(&mut self, relation: Relation, key: KeyTuple, extras: ExtraTuple) {
        self.sets
            .entry(relation)
            .or_default()
            .entry(key)
            .or_default()
            .insert(extras);
    }
}

/// Key tuples of a comic's four group levels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKeys {
    pub publisher: KeyTuple,
    pub imprint: KeyTuple,
    pub series: KeyTuple,
    pub volume: KeyTuple,
}

impl GroupKeys {
    pub fn get(&self, relation: Relation) -> Option<&KeyTuple> {
        match relation {
            Relation::Publisher => Some(&self.publisher),
            Relation::Imprint => Some(&self.imprint),
            Relation::Series => Some(&self.series),
            Relation::Volume => Some(&self.volume),
            _ => None,
        }
    }
}

/// Comic attributes stored on the comic row itself
#[derive(Debug, Clone, PartialEq)]
pub struct ComicScalars {
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

/// Canonical form of one archive's metadata
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedComic {
    pub path: String,
    pub groups: GroupKeys,
    /// Named leaf per relation (age rating, country, ...)
    pub simple_fks: BTreeMap<Relation, KeyTuple>,
    /// Many-to-many targets per linked relation
    pub links: BTreeMap<Relation, BTreeSet<KeyTuple>>,
    /// Ancestor folders below the library root, outermost first
    pub folders: Vec<String>,
    pub main_character: Option<String>,
    pub main_team: Option<String>,
    pub scalars: ComicScalars,
    /// Search document column values computed from this archive alone
    pub search_labels: BTreeMap<&'static str, String>,
}

impl NormalizedComic {
    /// Parent folder path, `None` at the library root
    pub fn parent_folder(&self) -> Option<&str> {
        self.folders.last().map(String::as_str)
    }
}

/// Accumulates proposals across the archives of one run
#[derive(Debug)]
pub struct MetadataNormalizer {
    library_root: String,
    proposals: Proposals,
    running_counts: HashMap<(Relation, KeyTuple), i64>,
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn text_key(value: &str) -> KeyTuple {
    vec![KeyValue::text(value)]
}

/// `1.0` → `"1"`, `1.5` → `"1.5"`, suffix appended verbatim
pub fn issue_label(number: Option<f64>, suffix: Option<&str>) -> String {
    let number = match number {
        Some(n) if n.fract() == 0.0 => format!("{}", n as i64),
        Some(n) => format!("{}", n),
        None => String::new(),
    };
    format!("{}{}", number, suffix.unwrap_or_default())
}

fn spaced(head: &str, tail: Option<String>) -> String {
    match tail {
        Some(tail) => format!("{} {}", head, tail),
        None => head.to_string(),
    }
}

impl MetadataNormalizer {
    pub fn new(library_root: impl Into<String>) -> Self {
        Self {
            library_root: library_root.into(),
            proposals: Proposals::default(),
            running_counts: HashMap::new(),
        }
    }

    /// Proposals accumulated so far
    pub fn proposals(&self) -> &Proposals {
        &self.proposals
    }

    pub fn finish(self) -> Proposals {
        self.proposals
    }

    fn propose(&mut self, relation: Relation, key: KeyTuple, mut extras: ExtraTuple) {
        for (index, field) in relation.descriptor().extras.iter().enumerate() {
            if field.kind != ExtraKind::Count {
                continue;
            }
            let slot = (relation, key.clone());
            let running = match (extras[index].as_int(), self.running_counts.get(&slot)) {
                (Some(new), Some(prior)) => Some(new.max(*prior)),
                (Some(new), None) => Some(new),
                (None, prior) => prior.copied(),
            };
            if let Some(running) = running {
                self.running_counts.insert(slot, running);
                extras[index] = ExtraValue::Int(running);
            }
        }
        self.proposals.insert(relation, key, extras);
    }

    fn identifier(&mut self, raw: &RawIdentifier) -> Option<IdentifierKey> {
        let source = clean(Some(raw.source.as_str()))?.to_lowercase();
        let key = clean(Some(raw.key.as_str()))?;
        let id_type = raw.id_type.trim().to_lowercase();
        let identifier = IdentifierKey::new(source, id_type, key);

        self.propose(Relation::IdentifierSource, text_key(&identifier.source), vec![]);
        self.propose(
            Relation::Identifier,
            identifier.key_tuple(),
            vec![ExtraValue::from(clean(raw.url.as_deref()))],
        );
        Some(identifier)
    }

    fn identifier_extra(&mut self, raw: Option<&RawIdentifier>) -> ExtraValue {
        ExtraValue::from(raw.and_then(|raw| self.identifier(raw)))
    }

    fn entity(&mut self, relation: Relation, raw: &RawEntity) -> Option<String> {
        let name = clean(Some(raw.name.as_str()))?;
        let identifier = self.identifier_extra(raw.identifier.as_ref());
        self.propose(relation, text_key(&name), vec![identifier]);
        Some(name)
    }

    fn group(&mut self, relation: Relation, parent: &KeyTuple, raw: &RawGroup) -> KeyTuple {
        let name = clean(raw.name.as_deref()).unwrap_or_default();
        let mut key = parent.clone();
        key.push(KeyValue::text(name));

        let mut extras = Vec::new();
        for field in relation.descriptor().extras {
            extras.push(match field.kind {
                ExtraKind::Identifier => self.identifier_extra(raw.identifier.as_ref()),
                ExtraKind::Count => ExtraValue::from(raw.count.filter(|c| *c >= 0)),
                ExtraKind::Scalar => ExtraValue::Null,
            });
        }
        self.propose(relation, key.clone(), extras);
        key
    }

    fn universe(&mut self, raw: &RawUniverse) -> Option<(String, Option<String>)> {
        let name = clean(Some(raw.name.as_str()))?;
        let designation = clean(raw.designation.as_deref());
        let identifier = self.identifier_extra(raw.identifier.as_ref());
        self.propose(
            Relation::Universe,
            text_key(&name),
            vec![identifier, ExtraValue::from(designation.clone())],
        );
        Some((name, designation))
    }

    fn credit(&mut self, raw: &RawCredit) -> Option<KeyTuple> {
        let person = self.entity(Relation::CreditPerson, &raw.person)?;
        let role = raw
            .role
            .as_ref()
            .and_then(|role| self.entity(Relation::CreditRole, role));
        let key = vec![
            KeyValue::text(person),
            role.map(KeyValue::Text).unwrap_or(KeyValue::Null),
        ];
        self.propose(Relation::Credit, key.clone(), vec![]);
        Some(key)
    }

    fn story_arc(&mut self, raw: &RawStoryArc) -> Option<KeyTuple> {
        let arc = self.entity(Relation::StoryArc, &raw.arc)?;
        let key = vec![
            KeyValue::text(arc),
            raw.number.map(KeyValue::Int).unwrap_or(KeyValue::Null),
        ];
        self.propose(Relation::StoryArcNumber, key.clone(), vec![]);
        Some(key)
    }

    fn scalars(path: &str, raw: &RawComicMetadata) -> ComicScalars {
        let name = clean(raw.name.as_deref());
        let stem = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        ComicScalars {
            sort_name: sort_name(name.as_deref().unwrap_or(&stem)),
            name,
            issue_number: raw.issue_number.filter(|n| n.is_finite()),
            issue_suffix: clean(raw.issue_suffix.as_deref()),
            year: raw.year,
            month: raw.month.filter(|m| (1..=12).contains(m)),
            day: raw.day.filter(|d| (1..=31).contains(d)),
            page_count: raw.page_count.unwrap_or(0).max(0),
            summary: clean(raw.summary.as_deref()),
            notes: clean(raw.notes.as_deref()),
            critical_rating: raw.critical_rating.filter(|r| r.is_finite()),
            reading_direction: raw
                .reading_direction
                .as_deref()
                .map(ReadingDirection::parse)
                .unwrap_or_default(),
            monochrome: raw.monochrome.unwrap_or(false),
            file_type: clean(raw.file_type.as_deref()),
            size: raw.size.max(0),
            mtime: raw.mtime,
        }
    }

    /// Normalize one archive and record its proposals
    pub fn add(&mut self, path: &str, raw: &RawComicMetadata) -> NormalizedComic {
        let mut labels: BTreeMap<&'static str, String> = BTreeMap::new();

        let publisher = self.group(Relation::Publisher, &Vec::new(), &raw.publisher);
        let imprint = self.group(Relation::Imprint, &publisher, &raw.imprint);
        let series = self.group(Relation::Series, &imprint, &raw.series);
        let volume = self.group(Relation::Volume, &series, &raw.volume);
        for (column, key) in [
            ("publisher", &publisher),
            ("imprint", &imprint),
            ("series", &series),
            ("volume", &volume),
        ] {
            let name = key.last().and_then(KeyValue::as_text).unwrap_or_default();
            labels.insert(column, name.to_string());
        }

        let mut simple_fks = BTreeMap::new();
        for (relation, column, value) in [
            (Relation::AgeRating, "age_rating", &raw.age_rating),
            (Relation::Country, "country", &raw.country),
            (Relation::Language, "language", &raw.language),
            (Relation::OriginalFormat, "original_format", &raw.original_format),
            (Relation::ScanInfo, "scan_info", &raw.scan_info),
            (Relation::Tagger, "tagger", &raw.tagger),
        ] {
            if let Some(name) = clean(value.as_deref()) {
                self.propose(relation, text_key(&name), vec![]);
                simple_fks.insert(relation, text_key(&name));
                labels.insert(column, name);
            }
        }

        let mut links: BTreeMap<Relation, BTreeSet<KeyTuple>> = BTreeMap::new();
        for (relation, column, entities) in [
            (Relation::Character, "characters", &raw.characters),
            (Relation::Genre, "genres", &raw.genres),
            (Relation::Location, "locations", &raw.locations),
            (Relation::SeriesGroup, "series_groups", &raw.series_groups),
            (Relation::Story, "stories", &raw.stories),
            (Relation::Tag, "tags", &raw.tags),
            (Relation::Team, "teams", &raw.teams),
        ] {
            let names: Vec<String> = entities
                .iter()
                .filter_map(|entity| self.entity(relation, entity))
                .collect();
            labels.insert(column, join_labels(&names));
            links
                .entry(relation)
                .or_default()
                .extend(names.iter().map(|name| text_key(name)));
        }

        let universes: Vec<(String, Option<String>)> =
            raw.universes.iter().filter_map(|u| self.universe(u)).collect();
        labels.insert(
            "universes",
            join_labels(universes.iter().map(|(n, d)| spaced(n, d.clone()))),
        );
        links
            .entry(Relation::Universe)
            .or_default()
            .extend(universes.iter().map(|(name, _)| text_key(name)));

        let credits: Vec<KeyTuple> = raw.credits.iter().filter_map(|c| self.credit(c)).collect();
        labels.insert(
            "credits",
            join_labels(credits.iter().map(|key| composite_label(key))),
        );
        links
            .entry(Relation::Credit)
            .or_default()
            .extend(credits);

        let arcs: Vec<KeyTuple> = raw
            .story_arcs
            .iter()
            .filter_map(|a| self.story_arc(a))
            .collect();
        labels.insert(
            "story_arcs",
            join_labels(arcs.iter().map(|key| composite_label(key))),
        );
        links.entry(Relation::StoryArcNumber).or_default().extend(arcs);

        let mut identifier_labels = Vec::new();
        let mut identifiers = BTreeSet::new();
        for raw_identifier in &raw.identifiers {
            if let Some(identifier) = self.identifier(raw_identifier) {
                identifier_labels.push(spaced(
                    &format!(
                        "{}:{}:{}",
                        identifier.source, identifier.id_type, identifier.key
                    ),
                    clean(raw_identifier.url.as_deref()),
                ));
                identifiers.insert(identifier.key_tuple());
            }
        }
        labels.insert("identifiers", join_labels(&identifier_labels));
        links.insert(Relation::Identifier, identifiers);

        let scalars = Self::scalars(path, raw);
        labels.insert("name", scalars.name.clone().unwrap_or_default());
        labels.insert(
            "issue",
            issue_label(scalars.issue_number, scalars.issue_suffix.as_deref()),
        );
        labels.insert("summary", scalars.summary.clone().unwrap_or_default());

        NormalizedComic {
            path: path.to_string(),
            groups: GroupKeys {
                publisher,
                imprint,
                series,
                volume,
            },
            simple_fks,
            links,
            folders: ancestor_paths(&self.library_root, path),
            main_character: clean(raw.main_character.as_deref()),
            main_team: clean(raw.main_team.as_deref()),
            scalars,
            search_labels: labels,
        }
    }
}

/// Label of a `(name, optional extra)` composite key, as stored in search
/// documents
fn composite_label(key: &KeyTuple) -> String {
    let mut parts = key.iter().filter_map(|value| match value {
        KeyValue::Null => None,
        KeyValue::Int(i) => Some(i.to_string()),
        KeyValue::Text(s) => Some(s.clone()),
    });
    let head = parts.next().unwrap_or_default();
    parts.fold(head, |label, part| format!("{} {}", label, part))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(source: &str, key: &str, url: Option<&str>) -> RawIdentifier {
        RawIdentifier {
            source: source.to_string(),
            id_type: "Series".to_string(),
            key: key.to_string(),
            url: url.map(str::to_string),
        }
    }

    fn saga() -> RawComicMetadata {
        RawComicMetadata {
            publisher: RawGroup::named("Image"),
            series: RawGroup {
                name: Some(" Saga ".to_string()),
                identifier: Some(ident("ComicVine", "4050-1", Some("https://cv/1"))),
                count: Some(1),
            },
            volume: RawGroup {
                name: Some("2012".to_string()),
                identifier: None,
                count: Some(54),
            },
            language: Some("en".to_string()),
            tags: vec![RawEntity::new("space"), RawEntity::new(" "), RawEntity::new("opera")],
            credits: vec![
                RawCredit {
                    person: RawEntity::new("Fiona Staples"),
                    role: Some(RawEntity::new("Artist")),
                },
                RawCredit {
                    person: RawEntity::new("Brian K. Vaughan"),
                    role: None,
                },
            ],
            story_arcs: vec![RawStoryArc {
                arc: RawEntity::new("Chapter One"),
                number: Some(3),
            }],
            universes: vec![RawUniverse {
                name: "Landfall".to_string(),
                designation: Some("A".to_string()),
                identifier: None,
            }],
            identifiers: vec![ident("comicvine", "4000-9", None)],
            main_character: Some("Alana".to_string()),
            name: Some("The Beginning".to_string()),
            issue_number: Some(1.0),
            month: Some(13),
            page_count: Some(-4),
            ..RawComicMetadata::default()
        }
    }

    fn text(values: &[&str]) -> KeyTuple {
        values.iter().map(|v| KeyValue::text(*v)).collect()
    }

    #[test]
    fn test_group_keys_include_ancestors_and_sentinel() {
        let mut normalizer = MetadataNormalizer::new("/lib");
        let comic = normalizer.add("/lib/Image/Saga 001.cbz", &saga());

        assert_eq!(comic.groups.publisher, text(&["Image"]));
        assert_eq!(comic.groups.imprint, text(&["Image", ""]));
        assert_eq!(comic.groups.series, text(&["Image", "", "Saga"]));
        assert_eq!(comic.groups.volume, text(&["Image", "", "Saga", "2012"]));
        assert_eq!(comic.folders, vec!["/lib/Image".to_string()]);
        assert_eq!(comic.parent_folder(), Some("/lib/Image"));
    }

    #[test]
    fn test_running_count_is_max_within_run() {
        let mut normalizer = MetadataNormalizer::new("/lib");
        let mut first = saga();
        first.volume.count = Some(60);
        normalizer.add("/lib/a.cbz", &first);
        let mut second = saga();
        second.volume.count = None;
        normalizer.add("/lib/b.cbz", &second);

        let proposals = normalizer.finish();
        let volumes = proposals.get(Relation::Volume).unwrap();
        let extras = &volumes[&text(&["Image", "", "Saga", "2012"])];
        assert!(extras.iter().all(|e| e[0] == ExtraValue::Int(60)));
    }

    #[test]
    fn test_identifier_url_is_not_part_of_key() {
        let mut normalizer = MetadataNormalizer::new("/lib");
        normalizer.add("/lib/a.cbz", &saga());
        let mut other = saga();
        other.series.identifier = Some(ident("comicvine", "4050-1", Some("https://cv/other")));
        normalizer.add("/lib/b.cbz", &other);

        let proposals = normalizer.finish();
        let identifiers = proposals.get(Relation::Identifier).unwrap();
        let key = text(&["comicvine", "series", "4050-1"]);
        assert_eq!(identifiers[&key].len(), 2);
        assert!(proposals
            .get(Relation::IdentifierSource)
            .unwrap()
            .contains_key(&text(&["comicvine"])));

        let series = proposals.get(Relation::Series).unwrap();
        let extras = &series[&text(&["Image", "", "Saga"])];
        assert_eq!(extras.len(), 1);
        let identifier = extras.iter().next().unwrap()[0].as_identifier().unwrap();
        assert_eq!(identifier.source_rank(), 1);
    }

    #[test]
    fn test_composites_decompose_into_sub_entities() {
        let mut normalizer = MetadataNormalizer::new("/lib");
        let comic = normalizer.add("/lib/a.cbz", &saga());
        let proposals = normalizer.finish();

        let credits = &comic.links[&Relation::Credit];
        assert!(credits.contains(&text(&["Fiona Staples", "Artist"])));
        assert!(credits.contains(&vec![KeyValue::text("Brian K. Vaughan"), KeyValue::Null]));
        assert!(proposals
            .get(Relation::CreditRole)
            .unwrap()
            .contains_key(&text(&["Artist"])));
        assert_eq!(proposals.get(Relation::CreditPerson).unwrap().len(), 2);

        let arcs = &comic.links[&Relation::StoryArcNumber];
        assert!(arcs.contains(&vec![KeyValue::text("Chapter One"), KeyValue::Int(3)]));
        assert!(proposals.get(Relation::StoryArc).is_some());
    }

    #[test]
    fn test_blank_names_are_dropped() {
        let mut normalizer = MetadataNormalizer::new("/lib");
        let comic = normalizer.add("/lib/a.cbz", &saga());
        assert_eq!(comic.links[&Relation::Tag].len(), 2);
        assert_eq!(comic.simple_fks[&Relation::Language], text(&["en"]));
        assert!(!comic.simple_fks.contains_key(&Relation::Country));
    }

    #[test]
    fn test_protagonist_is_never_proposed() {
        let mut normalizer = MetadataNormalizer::new("/lib");
        let comic = normalizer.add("/lib/a.cbz", &saga());
        assert_eq!(comic.main_character.as_deref(), Some("Alana"));
        assert!(normalizer.finish().get(Relation::Character).is_none());
    }

    #[test]
    fn test_scalars_are_coerced() {
        let mut normalizer = MetadataNormalizer::new("/lib");
        let comic = normalizer.add("/lib/a.cbz", &saga());
        assert_eq!(comic.scalars.month, None);
        assert_eq!(comic.scalars.page_count, 0);
        assert_eq!(comic.scalars.sort_name, "beginning");
        assert_eq!(comic.scalars.reading_direction, ReadingDirection::Ltr);
    }

    #[test]
    fn test_search_labels() {
        let mut normalizer = MetadataNormalizer::new("/lib");
        let comic = normalizer.add("/lib/a.cbz", &saga());
        let labels = &comic.search_labels;

        assert_eq!(labels["series"], "Saga");
        assert_eq!(labels["imprint"], "");
        assert_eq!(labels["issue"], "1");
        assert_eq!(labels["tags"], "opera, space");
        assert_eq!(labels["credits"], "Brian K. Vaughan, Fiona Staples Artist");
        assert_eq!(labels["story_arcs"], "Chapter One 3");
        assert_eq!(labels["universes"], "Landfall A");
        assert_eq!(labels["identifiers"], "comicvine:series:4000-9");
        assert_eq!(labels["language"], "en");
    }

    #[test]
    fn test_issue_label() {
        assert_eq!(issue_label(Some(1.5), None), "1.5");
        assert_eq!(issue_label(Some(12.0), Some("AU")), "12AU");
        assert_eq!(issue_label(None, None), "");
    }
}
