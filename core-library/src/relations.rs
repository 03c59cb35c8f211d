//! # Relation Descriptors
//!
//! Static description of every relation table the importer writes: how its
//! identity is keyed, which non-key attributes it carries, where it sits in
//! the write order, and which association table links it to comics.
//!
//! Behavior is looked up by [`Relation`] through [`Relation::descriptor`], a
//! closed table. Components never branch on table names.
//!
//! ## Key tuples
//!
//! A key tuple is the ordered list of identity values for one row, written
//! with every ancestor's key first. An imprint is keyed by
//! `(publisher name, imprint name)` and a credit by `(person name, role name)`.
//! [`KeyPart::Parent`] entries consume a prefix-free slice of the tuple and
//! resolve to the parent's row id at write time.

use crate::error::{LibraryError, Result};
use bridge_traits::database::QueryValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of relation tables the importer resolves and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    AgeRating,
    Country,
    Language,
    OriginalFormat,
    ScanInfo,
    Tagger,
    IdentifierSource,
    Identifier,
    Publisher,
    Imprint,
    Series,
    Volume,
    Character,
    Genre,
    Location,
    SeriesGroup,
    Story,
    Tag,
    Team,
    StoryArc,
    CreditPerson,
    CreditRole,
    Universe,
    Credit,
    StoryArcNumber,
}

/// Structural family of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// Publisher → Imprint → Series → Volume chain
    Group,
    /// Name-keyed leaf with no other attributes
    Named,
    /// Name-keyed entity that may carry an identifier
    Identified,
    /// Entity whose identity is built from other entities
    Composite,
}

/// One value in a key tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyValue {
    Null,
    Int(i64),
    Text(String),
}

impl KeyValue {
    pub fn text(value: impl Into<String>) -> Self {
        KeyValue::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            KeyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_query_value(&self) -> QueryValue {
        match self {
            KeyValue::Null => QueryValue::Null,
            KeyValue::Int(i) => QueryValue::Integer(*i),
            KeyValue::Text(s) => QueryValue::Text(s.clone()),
        }
    }

    /// Read a key column back from a result row
    ///
    /// # Errors
    /// Keys are integers or text; a fractional real or a blob is rejected.
    pub fn from_query_value(value: &QueryValue) -> Result<Self> {
        match value {
            QueryValue::Null => Ok(KeyValue::Null),
            QueryValue::Integer(i) => Ok(KeyValue::Int(*i)),
            QueryValue::Text(s) => Ok(KeyValue::Text(s.clone())),
            QueryValue::Real(r) if r.fract() == 0.0 && r.abs() <= i64::MAX as f64 => {
                Ok(KeyValue::Int(*r as i64))
            }
            QueryValue::Real(r) => Err(LibraryError::InvalidInput {
                field: "key".to_string(),
                message: format!("non-integer numeric key {}", r),
            }),
            QueryValue::Blob(_) => Err(LibraryError::InvalidInput {
                field: "key".to_string(),
                message: "blob key".to_string(),
            }),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => write!(f, "∅"),
            KeyValue::Int(i) => write!(f, "{}", i),
            KeyValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

pub type KeyTuple = Vec<KeyValue>;

/// Identity of an identifier row, without its url
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentifierKey {
    pub source: String,
    pub id_type: String,
    pub key: String,
}

impl IdentifierKey {
    pub fn new(
        source: impl Into<String>,
        id_type: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            id_type: id_type.into(),
            key: key.into(),
        }
    }

    /// Key tuple of the `Identifier` relation row this refers to
    pub fn key_tuple(&self) -> KeyTuple {
        vec![
            KeyValue::text(&self.source),
            KeyValue::text(&self.id_type),
            KeyValue::text(&self.key),
        ]
    }

    /// Rank of the source; lower wins. Unknown sources share the last rank.
    pub fn source_rank(&self) -> u8 {
        source_rank(&self.source)
    }
}

/// Identifier sources in priority order
pub const IDENTIFIER_SOURCE_PRIORITY: &[&str] = &["comicvine", "metron", "gcd", "lcg"];

/// 1-based priority of an identifier source, `len + 1` when unknown
pub fn source_rank(source: &str) -> u8 {
    let normalized = source.trim().to_lowercase();
    IDENTIFIER_SOURCE_PRIORITY
        .iter()
        .position(|s| *s == normalized)
        .map(|i| i as u8 + 1)
        .unwrap_or(IDENTIFIER_SOURCE_PRIORITY.len() as u8 + 1)
}

/// One value in an extra tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExtraValue {
    Null,
    Int(i64),
    Text(String),
    Identifier(IdentifierKey),
}

impl ExtraValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ExtraValue::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ExtraValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_identifier(&self) -> Option<&IdentifierKey> {
        match self {
            ExtraValue::Identifier(key) => Some(key),
            _ => None,
        }
    }
}

impl From<Option<String>> for ExtraValue {
    fn from(value: Option<String>) -> Self {
        value.map(ExtraValue::Text).unwrap_or(ExtraValue::Null)
    }
}

impl From<Option<i64>> for ExtraValue {
    fn from(value: Option<i64>) -> Self {
        value.map(ExtraValue::Int).unwrap_or(ExtraValue::Null)
    }
}

impl From<Option<IdentifierKey>> for ExtraValue {
    fn from(value: Option<IdentifierKey>) -> Self {
        value.map(ExtraValue::Identifier).unwrap_or(ExtraValue::Null)
    }
}

pub type ExtraTuple = Vec<ExtraValue>;

/// How one segment of a key tuple maps onto table columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPart {
    /// Literal value stored in `column`
    Column(&'static str),
    /// Foreign key in `column`, resolved from the next `arity` key values
    /// as the key tuple of `relation`
    Parent {
        column: &'static str,
        relation: Relation,
        arity: usize,
    },
}

/// Merge behavior of an extra attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraKind {
    /// Reference to an identifier row (source-priority merge)
    Identifier,
    /// Plain value (last non-null wins)
    Scalar,
    /// Cumulative count (maximum wins, never regresses)
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraField {
    /// Column written; `identifier_id` for identifier references
    pub column: &'static str,
    pub kind: ExtraKind,
}

/// Association table linking comics to a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTable {
    pub table: &'static str,
    pub column: &'static str,
}

/// Association between comics and folders
pub const FOLDER_LINK: LinkTable = LinkTable {
    table: "comic_folders",
    column: "folder_id",
};

/// Static facts about one relation
#[derive(Debug, Clone, Copy)]
pub struct RelationDescriptor {
    pub relation: Relation,
    pub kind: RelationKind,
    pub table: &'static str,
    /// `FROM` clause with the relation's own table aliased `t`
    pub from_clause: &'static str,
    pub key_parts: &'static [KeyPart],
    /// SQL expressions yielding each key value, in key-tuple order
    pub key_select: &'static [&'static str],
    pub extras: &'static [ExtraField],
    /// Write order; lower ranks are written first
    pub rank: u8,
    /// Belongs to the count-bearing group chain
    pub count_chain: bool,
    /// Carries `sort_name` and `custom_cover_id`
    pub sortable: bool,
    pub link: Option<LinkTable>,
    /// Search document column fed by this relation's labels
    pub search_column: Option<&'static str>,
    /// SQL expression rendering one label over `from_clause`
    pub search_label: &'static str,
}

const NAME_KEY: &[KeyPart] = &[KeyPart::Column("name")];
const NAME_SELECT: &[&str] = &["t.name"];
const IDENTIFIER_EXTRA: &[ExtraField] = &[ExtraField {
    column: "identifier_id",
    kind: ExtraKind::Identifier,
}];

macro_rules! named {
    ($relation:ident, $table:literal) => {
        RelationDescriptor {
            relation: Relation::$relation,
            kind: RelationKind::Named,
            table: $table,
            from_clause: concat!($table, " t"),
            key_parts: NAME_KEY,
            key_select: NAME_SELECT,
            extras: &[],
            rank: 0,
            count_chain: false,
            sortable: false,
            link: None,
            search_column: None,
            search_label: "t.name",
        }
    };
}

macro_rules! identified {
    ($relation:ident, $table:literal, $link:expr, $search:expr) => {
        RelationDescriptor {
            relation: Relation::$relation,
            kind: RelationKind::Identified,
            table: $table,
            from_clause: concat!($table, " t"),
            key_parts: NAME_KEY,
            key_select: NAME_SELECT,
            extras: IDENTIFIER_EXTRA,
            rank: 6,
            count_chain: false,
            sortable: false,
            link: $link,
            search_column: $search,
            search_label: "t.name",
        }
    };
}

const fn link(table: &'static str, column: &'static str) -> Option<LinkTable> {
    Some(LinkTable { table, column })
}

static DESCRIPTORS: &[RelationDescriptor] = &[
    named!(AgeRating, "age_ratings"),
    named!(Country, "countries"),
    named!(Language, "languages"),
    named!(OriginalFormat, "original_formats"),
    named!(ScanInfo, "scan_infos"),
    named!(Tagger, "taggers"),
    named!(IdentifierSource, "identifier_sources"),
    RelationDescriptor {
        relation: Relation::Identifier,
        kind: RelationKind::Composite,
        table: "identifiers",
        from_clause: "identifiers t JOIN identifier_sources s ON s.id = t.source_id",
        key_parts: &[
            KeyPart::Parent {
                column: "source_id",
                relation: Relation::IdentifierSource,
                arity: 1,
            },
            KeyPart::Column("id_type"),
            KeyPart::Column("key"),
        ],
        key_select: &["s.name", "t.id_type", "t.key"],
        extras: &[ExtraField {
            column: "url",
            kind: ExtraKind::Scalar,
        }],
        rank: 1,
        count_chain: false,
        sortable: false,
        link: link("comic_identifiers", "identifier_id"),
        search_column: Some("identifiers"),
        search_label: "s.name || ':' || t.id_type || ':' || t.key || IFNULL(' ' || t.url, '')",
    },
    RelationDescriptor {
        relation: Relation::Publisher,
        kind: RelationKind::Group,
        table: "publishers",
        from_clause: "publishers t",
        key_parts: NAME_KEY,
        key_select: NAME_SELECT,
        extras: IDENTIFIER_EXTRA,
        rank: 2,
        count_chain: true,
        sortable: true,
        link: None,
        search_column: None,
        search_label: "t.name",
    },
    RelationDescriptor {
        relation: Relation::Imprint,
        kind: RelationKind::Group,
        table: "imprints",
        from_clause: "imprints t JOIN publishers p ON p.id = t.publisher_id",
        key_parts: &[
            KeyPart::Parent {
                column: "publisher_id",
                relation: Relation::Publisher,
                arity: 1,
            },
            KeyPart::Column("name"),
        ],
        key_select: &["p.name", "t.name"],
        extras: IDENTIFIER_EXTRA,
        rank: 3,
        count_chain: true,
        sortable: true,
        link: None,
        search_column: None,
        search_label: "t.name",
    },
    RelationDescriptor {
        relation: Relation::Series,
        kind: RelationKind::Group,
        table: "series",
        from_clause: "series t JOIN imprints i ON i.id = t.imprint_id \
                      JOIN publishers p ON p.id = i.publisher_id",
        key_parts: &[
            KeyPart::Parent {
                column: "imprint_id",
                relation: Relation::Imprint,
                arity: 2,
            },
            KeyPart::Column("name"),
        ],
        key_select: &["p.name", "i.name", "t.name"],
        extras: &[
            ExtraField {
                column: "identifier_id",
                kind: ExtraKind::Identifier,
            },
            ExtraField {
                column: "volume_count",
                kind: ExtraKind::Count,
            },
        ],
        rank: 4,
        count_chain: true,
        sortable: true,
        link: None,
        search_column: None,
        search_label: "t.name",
    },
    RelationDescriptor {
        relation: Relation::Volume,
        kind: RelationKind::Group,
        table: "volumes",
        from_clause: "volumes t JOIN series s ON s.id = t.series_id \
                      JOIN imprints i ON i.id = s.imprint_id \
                      JOIN publishers p ON p.id = i.publisher_id",
        key_parts: &[
            KeyPart::Parent {
                column: "series_id",
                relation: Relation::Series,
                arity: 3,
            },
            KeyPart::Column("name"),
        ],
        key_select: &["p.name", "i.name", "s.name", "t.name"],
        extras: &[ExtraField {
            column: "issue_count",
            kind: ExtraKind::Count,
        }],
        rank: 5,
        count_chain: true,
        sortable: true,
        link: None,
        search_column: None,
        search_label: "t.name",
    },
    identified!(Character, "characters", link("comic_characters", "character_id"), Some("characters")),
    identified!(Genre, "genres", link("comic_genres", "genre_id"), Some("genres")),
    identified!(Location, "locations", link("comic_locations", "location_id"), Some("locations")),
    identified!(SeriesGroup, "series_groups", link("comic_series_groups", "series_group_id"), Some("series_groups")),
    identified!(Story, "stories", link("comic_stories", "story_id"), Some("stories")),
    identified!(Tag, "tags", link("comic_tags", "tag_id"), Some("tags")),
    identified!(Team, "teams", link("comic_teams", "team_id"), Some("teams")),
    identified!(StoryArc, "story_arcs", None, None),
    identified!(CreditPerson, "credit_persons", None, None),
    identified!(CreditRole, "credit_roles", None, None),
    RelationDescriptor {
        relation: Relation::Universe,
        kind: RelationKind::Identified,
        table: "universes",
        from_clause: "universes t",
        key_parts: NAME_KEY,
        key_select: NAME_SELECT,
        extras: &[
            ExtraField {
                column: "identifier_id",
                kind: ExtraKind::Identifier,
            },
            ExtraField {
                column: "designation",
                kind: ExtraKind::Scalar,
            },
        ],
        rank: 6,
        count_chain: false,
        sortable: false,
        link: link("comic_universes", "universe_id"),
        search_column: Some("universes"),
        search_label: "t.name || IFNULL(' ' || t.designation, '')",
    },
    RelationDescriptor {
        relation: Relation::Credit,
        kind: RelationKind::Composite,
        table: "credits",
        from_clause: "credits t JOIN credit_persons cp ON cp.id = t.person_id \
                      LEFT JOIN credit_roles cr ON cr.id = t.role_id",
        key_parts: &[
            KeyPart::Parent {
                column: "person_id",
                relation: Relation::CreditPerson,
                arity: 1,
            },
            KeyPart::Parent {
                column: "role_id",
                relation: Relation::CreditRole,
                arity: 1,
            },
        ],
        key_select: &["cp.name", "cr.name"],
        extras: &[],
        rank: 7,
        count_chain: false,
        sortable: false,
        link: link("comic_credits", "credit_id"),
        search_column: Some("credits"),
        search_label: "cp.name || IFNULL(' ' || cr.name, '')",
    },
    RelationDescriptor {
        relation: Relation::StoryArcNumber,
        kind: RelationKind::Composite,
        table: "story_arc_numbers",
        from_clause: "story_arc_numbers t JOIN story_arcs sa ON sa.id = t.story_arc_id",
        key_parts: &[
            KeyPart::Parent {
                column: "story_arc_id",
                relation: Relation::StoryArc,
                arity: 1,
            },
            KeyPart::Column("number"),
        ],
        key_select: &["sa.name", "t.number"],
        extras: &[],
        rank: 7,
        count_chain: false,
        sortable: false,
        link: link("comic_story_arc_numbers", "story_arc_number_id"),
        search_column: Some("story_arcs"),
        search_label: "sa.name || IFNULL(' ' || t.number, '')",
    },
];

impl Relation {
    /// Every relation, in write order
    pub fn all_in_write_order() -> Vec<Relation> {
        let mut relations: Vec<&RelationDescriptor> = DESCRIPTORS.iter().collect();
        relations.sort_by_key(|d| (d.rank, d.relation));
        relations.into_iter().map(|d| d.relation).collect()
    }

    /// Static descriptor; the table is laid out in declaration order
    pub fn descriptor(self) -> &'static RelationDescriptor {
        &DESCRIPTORS[self as usize]
    }

    pub fn kind(self) -> RelationKind {
        self.descriptor().kind
    }

    pub fn table(self) -> &'static str {
        self.descriptor().table
    }

    /// Relations linked to comics through an association table
    pub fn linked() -> impl Iterator<Item = Relation> {
        DESCRIPTORS
            .iter()
            .filter(|d| d.link.is_some())
            .map(|d| d.relation)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl RelationDescriptor {
    /// Number of values in this relation's key tuple
    pub fn key_arity(&self) -> usize {
        self.key_select.len()
    }

    /// Columns written for one row, in order
    pub fn insert_columns(&self) -> Vec<&'static str> {
        let mut columns: Vec<&'static str> = self
            .key_parts
            .iter()
            .map(|part| match part {
                KeyPart::Column(column) => *column,
                KeyPart::Parent { column, .. } => *column,
            })
            .collect();
        columns.extend(self.extras.iter().map(|e| e.column));
        if self.sortable {
            columns.push("sort_name");
            columns.push("custom_cover_id");
        }
        columns.push("created_at");
        columns.push("updated_at");
        columns
    }

    /// Columns refreshed when an existing row is updated
    pub fn update_assignments(&self) -> Vec<String> {
        let mut assignments: Vec<String> = self
            .extras
            .iter()
            .map(|e| match e.kind {
                ExtraKind::Count => format!(
                    "{col} = COALESCE(MAX({table}.{col}, excluded.{col}), {table}.{col}, excluded.{col})",
                    col = e.column,
                    table = self.table
                ),
                ExtraKind::Identifier | ExtraKind::Scalar => {
                    format!("{col} = excluded.{col}", col = e.column)
                }
            })
            .collect();
        if self.sortable {
            assignments.push("sort_name = excluded.sort_name".to_string());
            assignments.push("custom_cover_id = excluded.custom_cover_id".to_string());
        }
        if !assignments.is_empty() {
            assignments.push("updated_at = excluded.updated_at".to_string());
        }
        assignments
    }

    /// SELECT list and FROM clause returning `id`, `k0..kn` and the extras
    ///
    /// Identifier extras expand to three columns (`e{i}_source`,
    /// `e{i}_type`, `e{i}_key`) joined through `identifiers`.
    pub fn existing_rows_sql(&self) -> String {
        let mut select = vec!["t.id AS id".to_string()];
        for (i, expr) in self.key_select.iter().enumerate() {
            select.push(format!("{} AS k{}", expr, i));
        }
        let mut joins = String::new();
        for (i, extra) in self.extras.iter().enumerate() {
            match extra.kind {
                ExtraKind::Identifier => {
                    joins.push_str(&format!(
                        " LEFT JOIN identifiers xi{i} ON xi{i}.id = t.{col} \
                         LEFT JOIN identifier_sources xs{i} ON xs{i}.id = xi{i}.source_id",
                        i = i,
                        col = extra.column
                    ));
                    select.push(format!("xs{i}.name AS e{i}_source", i = i));
                    select.push(format!("xi{i}.id_type AS e{i}_type", i = i));
                    select.push(format!("xi{i}.key AS e{i}_key", i = i));
                }
                ExtraKind::Scalar | ExtraKind::Count => {
                    select.push(format!("t.{} AS e{}", extra.column, i));
                }
            }
        }
        format!(
            "SELECT {} FROM {}{}",
            select.join(", "),
            self.from_clause,
            joins
        )
    }
}

/// Build `(e0 = ? AND e1 IS NULL) OR (...)` for a batch of key tuples
///
/// Returns the predicate and its bound parameters. Null key values become
/// `IS NULL` tests and bind nothing. Clauses are paired into a balanced tree
/// so a thousand-tuple batch stays well under SQLite's expression depth limit.
pub fn or_predicate(exprs: &[&str], keys: &[KeyTuple]) -> (String, Vec<QueryValue>) {
    let mut params = Vec::new();
    let clauses: Vec<String> = keys
        .iter()
        .map(|key| {
            let terms: Vec<String> = exprs
                .iter()
                .zip(key.iter())
                .map(|(expr, value)| match value {
                    KeyValue::Null => format!("{} IS NULL", expr),
                    other => {
                        params.push(other.to_query_value());
                        format!("{} = ?", expr)
                    }
                })
                .collect();
            format!("({})", terms.join(" AND "))
        })
        .collect();
    (balanced_or(clauses), params)
}

fn balanced_or(mut clauses: Vec<String>) -> String {
    if clauses.is_empty() {
        return "0".to_string();
    }
    while clauses.len() > 1 {
        clauses = clauses
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => format!("({} OR {})", left, right),
                [single] => single.clone(),
                _ => String::new(),
            })
            .collect();
    }
    clauses.swap_remove(0)
}
