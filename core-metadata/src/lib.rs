//! # Comic Metadata Module
//!
//! Reads comic archive metadata and normalizes it into relation tuples.
//!
//! ## Overview
//!
//! This module handles:
//! - The [`ComicExtractor`] seam and classified [`ExtractionFailure`]s
//! - The raw metadata vocabulary extractors report
//! - [`MetadataNormalizer`], which turns raw metadata into group keys, foreign
//!   keys, many-to-many target sets and per-relation proposal sets

pub mod error;
pub mod extractor;
pub mod normalizer;
pub mod raw;

pub use error::{MetadataError, Result};
pub use extractor::{ComicExtractor, ExtractionFailure, FailureKind, SidecarExtractor};
pub use normalizer::{
    issue_label, ComicScalars, GroupKeys, MetadataNormalizer, NormalizedComic, ProposalSet,
    Proposals,
};
pub use raw::{
    RawComicMetadata, RawCredit, RawEntity, RawGroup, RawIdentifier, RawStoryArc, RawUniverse,
};
