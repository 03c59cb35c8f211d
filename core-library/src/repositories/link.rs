//! Association table repository
//!
//! Reads and writes comic association rows directly, in bulk, for any
//! [`LinkTable`].

use crate::batching::Batches;
use crate::error::Result;
use crate::models::ComicId;
use crate::relations::LinkTable;
use crate::repositories::{get_i64, placeholders, value_rows};
use bridge_traits::database::{DatabaseAdapter, QueryValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::instrument;

/// One association row
pub type LinkPair = (ComicId, i64);

/// Association repository interface
#[async_trait::async_trait]
pub trait LinkRepository: Send + Sync {
    /// Current targets of each comic; comics with no rows are absent
    async fn existing(
        &self,
        link: LinkTable,
        comic_ids: &[ComicId],
        batch_size: usize,
    ) -> Result<HashMap<ComicId, BTreeSet<i64>>>;

    /// Delete association rows
    async fn delete(&self, link: LinkTable, pairs: &[LinkPair], batch_size: usize)
        -> Result<u64>;

    /// Insert association rows, ignoring rows that already exist
    ///
    /// # Errors
    /// Returns error if a target row no longer exists.
    async fn create(&self, link: LinkTable, pairs: &[LinkPair], batch_size: usize)
        -> Result<u64>;

    /// Comics linked to any of `target_ids`
    async fn comics_linked_to(
        &self,
        link: LinkTable,
        target_ids: &[i64],
        batch_size: usize,
    ) -> Result<BTreeSet<ComicId>>;
}

/// SQLite implementation of LinkRepository
pub struct SqliteLinkRepository {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl SqliteLinkRepository {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    fn pair_params(pairs: &[LinkPair]) -> Vec<QueryValue> {
        pairs
            .iter()
            .flat_map(|(comic, target)| [QueryValue::Integer(comic.0), QueryValue::Integer(*target)])
            .collect()
    }
}

#[async_trait::async_trait]
impl LinkRepository for SqliteLinkRepository {
    async fn existing(
        &self,
        link: LinkTable,
        comic_ids: &[ComicId],
        batch_size: usize,
    ) -> Result<HashMap<ComicId, BTreeSet<i64>>> {
        let mut existing: HashMap<ComicId, BTreeSet<i64>> = HashMap::new();
        for chunk in Batches::new(comic_ids, batch_size) {
            let sql = format!(
                "SELECT comic_id, {col} AS target_id FROM {table} WHERE comic_id IN ({})",
                placeholders(chunk.len()),
                col = link.column,
                table = link.table
            );
            let params: Vec<QueryValue> = chunk.iter().map(|id| QueryValue::Integer(id.0)).collect();
            for row in self.adapter.query(&sql, &params).await? {
                existing
                    .entry(ComicId(get_i64(&row, "comic_id")?))
                    .or_default()
                    .insert(get_i64(&row, "target_id")?);
            }
        }
        Ok(existing)
    }

    #[instrument(skip(self, pairs), fields(table = link.table, pairs = pairs.len()))]
    async fn delete(
        &self,
        link: LinkTable,
        pairs: &[LinkPair],
        batch_size: usize,
    ) -> Result<u64> {
        let mut deleted = 0;
        for chunk in Batches::new(pairs, batch_size) {
            let sql = format!(
                "DELETE FROM {} WHERE (comic_id, {}) IN (VALUES {})",
                link.table,
                link.column,
                value_rows(chunk.len(), 2)
            );
            deleted += self
                .adapter
                .execute(&sql, &Self::pair_params(chunk))
                .await?;
        }
        Ok(deleted)
    }

    #[instrument(skip(self, pairs), fields(table = link.table, pairs = pairs.len()))]
    async fn create(
        &self,
        link: LinkTable,
        pairs: &[LinkPair],
        batch_size: usize,
    ) -> Result<u64> {
        let mut created = 0;
        for chunk in Batches::new(pairs, batch_size) {
            let sql = format!(
                "INSERT INTO {} (comic_id, {}) VALUES {} ON CONFLICT DO NOTHING",
                link.table,
                link.column,
                value_rows(chunk.len(), 2)
            );
            created += self
                .adapter
                .execute(&sql, &Self::pair_params(chunk))
                .await?;
        }
        Ok(created)
    }

    async fn comics_linked_to(
        &self,
        link: LinkTable,
        target_ids: &[i64],
        batch_size: usize,
    ) -> Result<BTreeSet<ComicId>> {
        let mut comics = BTreeSet::new();
        for chunk in Batches::new(target_ids, batch_size) {
            let sql = format!(
                "SELECT DISTINCT comic_id FROM {} WHERE {} IN ({})",
                link.table,
                link.column,
                placeholders(chunk.len())
            );
            let params: Vec<QueryValue> = chunk.iter().map(|id| QueryValue::Integer(*id)).collect();
            for row in self.adapter.query(&sql, &params).await? {
                comics.insert(ComicId(get_i64(&row, "comic_id")?));
            }
        }
        Ok(comics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::Relation;
    use crate::repositories::comic::tests::comic_fixture;
    use crate::repositories::comic::{ComicRepository, SqliteComicRepository};
    use crate::repositories::test_support::adapter_with_library;

    async fn setup() -> (SqliteLinkRepository, ComicId, LinkTable) {
        let (adapter, library) = adapter_with_library().await;
        let comic = comic_fixture(adapter.clone(), library, "/lib/a.cbz").await;
        let comics = SqliteComicRepository::new(adapter.clone());
        comics.upsert(&[comic], 0, 10).await.unwrap();
        let id = comics
            .ids_by_paths(&["/lib/a.cbz".to_string()], 10)
            .await
            .unwrap()["/lib/a.cbz"];
        for name in ["X", "Y", "Z"] {
            adapter
                .execute(
                    "INSERT INTO series_groups (name, created_at, updated_at) VALUES (?, 0, 0)",
                    &[QueryValue::from(name)],
                )
                .await
                .unwrap();
        }
        let link = Relation::SeriesGroup.descriptor().link.unwrap();
        (SqliteLinkRepository::new(adapter), id, link)
    }

    #[tokio::test]
    async fn test_create_then_read_existing() {
        let (repo, comic, link) = setup().await;

        let created = repo
            .create(link, &[(comic, 1), (comic, 2)], 100)
            .await
            .unwrap();
        assert_eq!(created, 2);
        assert_eq!(repo.create(link, &[(comic, 1)], 100).await.unwrap(), 0);

        let existing = repo.existing(link, &[comic], 100).await.unwrap();
        assert_eq!(existing[&comic], BTreeSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_delete_only_named_pairs() {
        let (repo, comic, link) = setup().await;
        repo.create(link, &[(comic, 1), (comic, 2), (comic, 3)], 100)
            .await
            .unwrap();

        let deleted = repo.delete(link, &[(comic, 2)], 100).await.unwrap();

        assert_eq!(deleted, 1);
        let existing = repo.existing(link, &[comic], 100).await.unwrap();
        assert_eq!(existing[&comic], BTreeSet::from([1, 3]));
    }

    #[tokio::test]
    async fn test_create_rejects_missing_target() {
        let (repo, comic, link) = setup().await;
        assert!(repo.create(link, &[(comic, 99)], 100).await.is_err());
    }

    #[tokio::test]
    async fn test_comics_linked_to() {
        let (repo, comic, link) = setup().await;
        repo.create(link, &[(comic, 3)], 100).await.unwrap();

        assert_eq!(
            repo.comics_linked_to(link, &[3], 100).await.unwrap(),
            BTreeSet::from([comic])
        );
        assert!(repo.comics_linked_to(link, &[1], 100).await.unwrap().is_empty());
    }
}
