//! Search document repository
//!
//! `search_documents` is mirrored into the `search_fts` FTS5 table by
//! triggers, so writing a document here is all that is needed to make it
//! searchable.

use crate::batching::Batches;
use crate::error::{LibraryError, Result};
use crate::models::{ComicId, SearchDocument, SEARCH_COLUMNS};
use crate::relations::Relation;
use crate::repositories::{get_i64, get_string, placeholders, value_rows};
use bridge_traits::database::{DatabaseAdapter, QueryValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Search document repository interface
#[async_trait::async_trait]
pub trait SearchRepository: Send + Sync {
    /// Write documents; rows whose columns are all unchanged are not touched
    async fn upsert(&self, documents: &[SearchDocument], now: i64, batch_size: usize)
        -> Result<u64>;

    async fn get(&self, comic_id: ComicId) -> Result<Option<SearchDocument>>;

    /// Current labels of `relation` per comic, sorted, deduplicated and
    /// joined with `", "`
    ///
    /// One query per batch of comics. Comics with no linked rows are absent.
    ///
    /// # Errors
    /// Returns `InvalidInput` for relations that feed no search column.
    async fn aggregate_labels(
        &self,
        relation: Relation,
        comic_ids: &[ComicId],
        batch_size: usize,
    ) -> Result<HashMap<ComicId, String>>;

    /// Overwrite one column for existing documents
    ///
    /// # Returns
    /// Number of documents whose value changed.
    async fn update_column(
        &self,
        column: &str,
        values: &[(ComicId, String)],
        now: i64,
    ) -> Result<u64>;
}

/// SQLite implementation of SearchRepository
pub struct SqliteSearchRepository {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl SqliteSearchRepository {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    fn upsert_sql(rows: usize) -> String {
        let assignments: Vec<String> = SEARCH_COLUMNS
            .iter()
            .map(|c| format!("{c} = excluded.{c}", c = c))
            .collect();
        let changed: Vec<String> = SEARCH_COLUMNS
            .iter()
            .map(|c| format!("search_documents.{c} IS NOT excluded.{c}", c = c))
            .collect();
        format!(
            "INSERT INTO search_documents (comic_id, {}, updated_at) VALUES {} \
             ON CONFLICT(comic_id) DO UPDATE SET {}, updated_at = excluded.updated_at \
             WHERE {}",
            SEARCH_COLUMNS.join(", "),
            value_rows(rows, SEARCH_COLUMNS.len() + 2),
            assignments.join(", "),
            changed.join(" OR ")
        )
    }

    fn check_column(column: &str) -> Result<()> {
        if SEARCH_COLUMNS.contains(&column) {
            Ok(())
        } else {
            Err(LibraryError::InvalidInput {
                field: "column".to_string(),
                message: format!("{} is not a search column", column),
            })
        }
    }
}

#[async_trait::async_trait]
impl SearchRepository for SqliteSearchRepository {
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    async fn upsert(
        &self,
        documents: &[SearchDocument],
        now: i64,
        batch_size: usize,
    ) -> Result<u64> {
        let mut affected = 0;
        for chunk in Batches::new(documents, batch_size) {
            let params: Vec<QueryValue> = chunk
                .iter()
                .flat_map(|doc| {
                    std::iter::once(QueryValue::Integer(doc.comic_id.0))
                        .chain(doc.columns.iter().map(QueryValue::from))
                        .chain(std::iter::once(QueryValue::Integer(now)))
                })
                .collect();
            affected += self
                .adapter
                .execute(&Self::upsert_sql(chunk.len()), &params)
                .await?;
        }
        Ok(affected)
    }

    async fn get(&self, comic_id: ComicId) -> Result<Option<SearchDocument>> {
        let sql = format!(
            "SELECT {} FROM search_documents WHERE comic_id = ?",
            SEARCH_COLUMNS.join(", ")
        );
        let Some(row) = self
            .adapter
            .query_one_optional(&sql, &[QueryValue::Integer(comic_id.0)])
            .await?
        else {
            return Ok(None);
        };

        let mut document = SearchDocument::new(comic_id);
        for column in SEARCH_COLUMNS {
            document.set(column, get_string(&row, column)?);
        }
        Ok(Some(document))
    }

    #[instrument(skip(self, comic_ids), fields(comics = comic_ids.len()))]
    async fn aggregate_labels(
        &self,
        relation: Relation,
        comic_ids: &[ComicId],
        batch_size: usize,
    ) -> Result<HashMap<ComicId, String>> {
        let descriptor = relation.descriptor();
        let link = descriptor.link.filter(|_| descriptor.search_column.is_some());
        let Some(link) = link else {
            return Err(LibraryError::InvalidInput {
                field: "relation".to_string(),
                message: format!("{} has no search column", relation),
            });
        };

        let mut labels = HashMap::new();
        for chunk in Batches::new(comic_ids, batch_size) {
            let sql = format!(
                "SELECT comic_id, GROUP_CONCAT(label, ', ' ORDER BY label) AS labels FROM (\
                 SELECT DISTINCT l.comic_id AS comic_id, {label} AS label \
                 FROM {from} JOIN {link_table} l ON l.{link_column} = t.id \
                 WHERE l.comic_id IN ({ids})\
                 ) WHERE label <> '' GROUP BY comic_id",
                label = descriptor.search_label,
                from = descriptor.from_clause,
                link_table = link.table,
                link_column = link.column,
                ids = placeholders(chunk.len())
            );
            let params: Vec<QueryValue> =
                chunk.iter().map(|id| QueryValue::Integer(id.0)).collect();
            for row in self.adapter.query(&sql, &params).await? {
                labels.insert(
                    ComicId(get_i64(&row, "comic_id")?),
                    get_string(&row, "labels")?,
                );
            }
        }
        Ok(labels)
    }

    async fn update_column(
        &self,
        column: &str,
        values: &[(ComicId, String)],
        now: i64,
    ) -> Result<u64> {
        Self::check_column(column)?;
        if values.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE search_documents SET {col} = ?, updated_at = ? \
             WHERE comic_id = ? AND {col} IS NOT ?",
            col = column
        );
        let params: Vec<[QueryValue; 4]> = values
            .iter()
            .map(|(comic_id, value)| {
                [
                    QueryValue::from(value),
                    QueryValue::Integer(now),
                    QueryValue::Integer(comic_id.0),
                    QueryValue::from(value),
                ]
            })
            .collect();
        let statements: Vec<(&str, &[QueryValue])> =
            params.iter().map(|p| (sql.as_str(), &p[..])).collect();
        let results = self.adapter.execute_batch(&statements).await?;
        Ok(results.iter().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::join_labels;
    use crate::repositories::comic::tests::comic_fixture;
    use crate::repositories::comic::{ComicRepository, SqliteComicRepository};
    use crate::repositories::test_support::adapter_with_library;

    async fn setup() -> (Arc<dyn DatabaseAdapter>, SqliteSearchRepository, ComicId) {
        let (adapter, library) = adapter_with_library().await;
        let comic = comic_fixture(adapter.clone(), library, "/lib/a.cbz").await;
        let comics = SqliteComicRepository::new(adapter.clone());
        comics.upsert(&[comic], 0, 10).await.unwrap();
        let id = comics
            .ids_by_paths(&["/lib/a.cbz".to_string()], 10)
            .await
            .unwrap()["/lib/a.cbz"];
        (adapter.clone(), SqliteSearchRepository::new(adapter), id)
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (_, repo, comic) = setup().await;
        let mut doc = SearchDocument::new(comic);
        doc.set("series", "Saga");
        doc.set("tags", join_labels(["space", "opera"]));

        assert_eq!(repo.upsert(&[doc.clone()], 1, 10).await.unwrap(), 1);
        assert_eq!(repo.get(comic).await.unwrap(), Some(doc.clone()));
        assert_eq!(repo.upsert(&[doc], 2, 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_document_is_searchable() {
        let (adapter, repo, comic) = setup().await;
        let mut doc = SearchDocument::new(comic);
        doc.set("summary", "a galactic war epic");
        repo.upsert(&[doc], 1, 10).await.unwrap();

        let rows = adapter
            .query(
                "SELECT rowid FROM search_fts WHERE search_fts MATCH ?",
                &[QueryValue::from("galactic")],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_labels_matches_inline_join() {
        let (adapter, repo, comic) = setup().await;
        for (name, designation) in [("Earth", Some("616")), ("Alpha", None)] {
            adapter
                .execute(
                    "INSERT INTO universes (name, designation, created_at, updated_at) \
                     VALUES (?, ?, 0, 0)",
                    &[QueryValue::from(name), QueryValue::from(designation)],
                )
                .await
                .unwrap();
        }
        adapter
            .execute(
                "INSERT INTO comic_universes (comic_id, universe_id) VALUES (?, 1), (?, 2)",
                &[QueryValue::Integer(comic.0), QueryValue::Integer(comic.0)],
            )
            .await
            .unwrap();

        let labels = repo
            .aggregate_labels(Relation::Universe, &[comic], 100)
            .await
            .unwrap();

        assert_eq!(labels[&comic], join_labels(["Earth 616", "Alpha"]));
        assert_eq!(labels[&comic], "Alpha, Earth 616");
    }

    #[tokio::test]
    async fn test_aggregate_rejects_unsearchable_relation() {
        let (_, repo, comic) = setup().await;
        assert!(repo
            .aggregate_labels(Relation::Publisher, &[comic], 100)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_update_column() {
        let (_, repo, comic) = setup().await;
        repo.upsert(&[SearchDocument::new(comic)], 1, 10).await.unwrap();

        let values = vec![(comic, "Alpha".to_string())];
        assert_eq!(repo.update_column("universes", &values, 2).await.unwrap(), 1);
        assert_eq!(repo.update_column("universes", &values, 3).await.unwrap(), 0);
        assert_eq!(
            repo.get(comic).await.unwrap().unwrap().get("universes"),
            Some("Alpha")
        );
        assert!(repo.update_column("bogus", &values, 4).await.is_err());
    }
}
