//! # Catalog Library Module
//!
//! Owns the comic catalog database and the data access layer the
//! synchronization pipeline writes through.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite schema, migrations and connection pooling
//! - The relation descriptor table driving every relation read and write
//! - Repository patterns for comics, folders, links, covers, failed imports
//!   and search documents
//! - Full-text search using FTS5, fed from `search_documents` by triggers

pub mod adapters;
pub mod batching;
pub mod db;
pub mod error;
pub mod models;
pub mod relations;
pub mod repositories;

pub use batching::{batch_count, Batches};
pub use error::{LibraryError, Result};
pub use models::{
    join_labels, sort_name, Comic, ComicId, CoverGroup, CustomCover, FailedImport, Folder,
    Library, LibraryId, ReadingDirection, SearchDocument, StoredComic, StoredFolder,
    SEARCH_COLUMNS,
};
pub use relations::{
    ExtraKind, ExtraTuple, ExtraValue, IdentifierKey, KeyTuple, KeyValue, Relation,
    RelationDescriptor, RelationKind,
};
