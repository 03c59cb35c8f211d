//! # Search Index Synchronizer
//!
//! Keeps one search document per comic in step with the catalog.
//!
//! Two write paths:
//!
//! - **Inline**: every comic created or updated in this run gets its whole
//!   document rewritten from the labels computed during normalization. No
//!   extra query is needed.
//! - **Fix-up**: when a related row's own display attributes change (an
//!   identifier's url, a universe's designation) without any of its comics
//!   changing, the affected column is recomputed with one aggregate query
//!   per relation and batch of comics.
//!
//! Both paths compare before writing, so a rerun on unchanged data writes
//! nothing. Rebuilding the whole index is a separate operation.

use crate::error::{Result, SyncError};
use core_library::repositories::{LinkRepository, SearchRepository};
use core_library::{ComicId, Relation, SearchDocument};
use core_metadata::NormalizedComic;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Document for one comic built from its normalized labels
pub fn document_for(comic_id: ComicId, comic: &NormalizedComic) -> SearchDocument {
    let mut document = SearchDocument::new(comic_id);
    for (column, value) in &comic.search_labels {
        document.set(column, value.as_str());
    }
    document
}

pub struct SearchIndexSynchronizer {
    search: Arc<dyn SearchRepository>,
    links: Arc<dyn LinkRepository>,
    query_batch_size: usize,
    write_batch_size: usize,
}

impl SearchIndexSynchronizer {
    pub fn new(
        search: Arc<dyn SearchRepository>,
        links: Arc<dyn LinkRepository>,
        query_batch_size: usize,
        write_batch_size: usize,
    ) -> Self {
        Self {
            search,
            links,
            query_batch_size,
            write_batch_size,
        }
    }

    /// Rewrite the documents of comics written in this run
    pub async fn sync_documents(
        &self,
        comics: &[(ComicId, &NormalizedComic)],
        now: i64,
    ) -> Result<u64> {
        if comics.is_empty() {
            return Ok(0);
        }
        let documents: Vec<SearchDocument> = comics
            .iter()
            .map(|(id, comic)| document_for(*id, comic))
            .collect();
        let written = self
            .search
            .upsert(&documents, now, self.write_batch_size)
            .await?;
        debug!(documents = written, "Search documents written");
        Ok(written)
    }

    /// Recompute columns fed by relation rows updated in this run
    ///
    /// Comics in `already_written` got a fresh document inline and are left
    /// alone.
    #[instrument(skip_all, fields(relations = updated_ids.len()))]
    pub async fn fix_up(
        &self,
        updated_ids: &BTreeMap<Relation, Vec<i64>>,
        already_written: &BTreeSet<ComicId>,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut changed = 0;
        for (relation, ids) in updated_ids {
            let descriptor = relation.descriptor();
            let (Some(column), Some(link)) = (descriptor.search_column, descriptor.link) else {
                continue;
            };
            if ids.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let comics: Vec<ComicId> = self
                .links
                .comics_linked_to(link, ids, self.query_batch_size)
                .await?
                .into_iter()
                .filter(|comic| !already_written.contains(comic))
                .collect();
            if comics.is_empty() {
                continue;
            }

            let labels = self
                .search
                .aggregate_labels(*relation, &comics, self.query_batch_size)
                .await?;
            let values: Vec<(ComicId, String)> = comics
                .iter()
                .map(|comic| (*comic, labels.get(comic).cloned().unwrap_or_default()))
                .collect();
            let updated = self.search.update_column(column, &values, now).await?;
            debug!(%relation, column, comics = comics.len(), updated, "Search column fixed up");
            changed += updated;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{catalog, comic_row};
    use bridge_traits::database::QueryValue;
    use core_library::relations::LinkTable;
    use core_library::repositories::RelationRepository;
    use core_library::KeyValue;
    use core_metadata::{MetadataNormalizer, RawComicMetadata, RawEntity};

    #[test]
    fn test_document_from_labels() {
        let mut normalizer = MetadataNormalizer::new("/lib");
        let raw = RawComicMetadata {
            tags: vec![RawEntity::new("b"), RawEntity::new("a")],
            ..Default::default()
        };
        let comic = normalizer.add("/lib/x.cbz", &raw);
        let document = document_for(ComicId(9), &comic);

        assert_eq!(document.comic_id, ComicId(9));
        assert_eq!(document.get("tags"), Some("a, b"));
        assert_eq!(document.get("characters"), Some(""));
    }

    /// Identifier row plus its source, returning the identifier id
    async fn identifier(catalog: &crate::test_support::Catalog, url: &str) -> i64 {
        let relations = &catalog.relations;
        let source = vec![KeyValue::text("metron")];
        relations
            .upsert(
                Relation::IdentifierSource,
                &[vec![
                    QueryValue::from("metron"),
                    QueryValue::Integer(1),
                    QueryValue::Integer(1),
                ]],
                10,
            )
            .await
            .unwrap();
        let source_id = relations
            .find_ids(Relation::IdentifierSource, &[source], 10)
            .await
            .unwrap()
            .into_values()
            .next()
            .unwrap();
        relations
            .upsert(
                Relation::Identifier,
                &[vec![
                    QueryValue::Integer(source_id),
                    QueryValue::from("issue"),
                    QueryValue::from("42"),
                    QueryValue::from(url),
                    QueryValue::Integer(1),
                    QueryValue::Integer(1),
                ]],
                10,
            )
            .await
            .unwrap();
        let key = vec![
            KeyValue::text("metron"),
            KeyValue::text("issue"),
            KeyValue::text("42"),
        ];
        relations
            .find_ids(Relation::Identifier, &[key], 10)
            .await
            .unwrap()
            .into_values()
            .next()
            .unwrap()
    }

    #[tokio::test]
    async fn test_fix_up_recomputes_changed_relation_column() {
        let catalog = catalog().await;
        let comic = comic_row(&catalog, "/lib/a.cbz").await;
        let identifier_id = identifier(&catalog, "https://old").await;
        let link: LinkTable = Relation::Identifier.descriptor().link.unwrap();
        catalog
            .links
            .create(link, &[(comic, identifier_id)], 10)
            .await
            .unwrap();

        let mut document = SearchDocument::new(comic);
        document.set("identifiers", "metron:issue:42 https://old");
        catalog.search.upsert(&[document], 1, 10).await.unwrap();

        // url changed on the identifier row only
        identifier(&catalog, "https://new").await;

        let sync = SearchIndexSynchronizer::new(
            catalog.search.clone(),
            catalog.links.clone(),
            100,
            100,
        );
        let updated: BTreeMap<Relation, Vec<i64>> =
            [(Relation::Identifier, vec![identifier_id])].into_iter().collect();
        let cancel = CancellationToken::new();

        let changed = sync
            .fix_up(&updated, &BTreeSet::new(), 2, &cancel)
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let stored = catalog.search.get(comic).await.unwrap().unwrap();
        assert_eq!(stored.get("identifiers"), Some("metron:issue:42 https://new"));

        let again = sync
            .fix_up(&updated, &BTreeSet::new(), 3, &cancel)
            .await
            .unwrap();
        assert_eq!(again, 0);

        let skipped = sync
            .fix_up(&updated, &[comic].into_iter().collect(), 4, &cancel)
            .await
            .unwrap();
        assert_eq!(skipped, 0);
    }
}
