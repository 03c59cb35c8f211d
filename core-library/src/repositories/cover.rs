//! Custom cover repository trait and implementation

use crate::batching::Batches;
use crate::error::Result;
use crate::models::{CoverGroup, CustomCover};
use crate::repositories::{get_i64, get_string, placeholders, value_rows};
use bridge_traits::database::{DatabaseAdapter, QueryValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Custom cover repository interface
#[async_trait::async_trait]
pub trait CoverRepository: Send + Sync {
    /// Insert covers, refreshing group, sort key, size and mtime of existing
    /// paths
    async fn upsert(&self, covers: &[CustomCover], now: i64, batch_size: usize) -> Result<u64>;

    /// Resolve paths to cover ids, skipping paths with no row
    async fn ids_by_paths(
        &self,
        paths: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, i64>>;

    /// Cover id per sort key within one group; the newest cover wins ties
    async fn ids_by_sort_names(
        &self,
        group: CoverGroup,
        sort_names: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, i64>>;

    /// Point every row of `group` at the cover matching its sort key
    ///
    /// Rows already pointing at the right cover are not written.
    ///
    /// # Returns
    /// Number of group rows changed.
    async fn link_groups(&self, group: CoverGroup, now: i64) -> Result<u64>;

    /// Rewrite cover paths, re-deriving group and sort key from the new path
    ///
    /// Moves whose destination is not a cover location are skipped.
    async fn move_paths(&self, moves: &[(String, String)], now: i64) -> Result<u64>;

    /// Delete covers; groups pointing at them fall back to no cover
    async fn delete_by_paths(&self, paths: &[String], batch_size: usize) -> Result<u64>;
}

/// SQLite implementation of CoverRepository
pub struct SqliteCoverRepository {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl SqliteCoverRepository {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    fn insert_params(cover: &CustomCover, now: i64) -> Vec<QueryValue> {
        vec![
            QueryValue::Integer(cover.library_id.0),
            QueryValue::Text(cover.path.clone()),
            QueryValue::from(cover.group.table()),
            QueryValue::Text(cover.sort_name.clone()),
            QueryValue::Integer(cover.size),
            QueryValue::from(cover.mtime),
            QueryValue::Integer(now),
            QueryValue::Integer(now),
        ]
    }
}

#[async_trait::async_trait]
impl CoverRepository for SqliteCoverRepository {
    #[instrument(skip(self, covers), fields(covers = covers.len()))]
    async fn upsert(&self, covers: &[CustomCover], now: i64, batch_size: usize) -> Result<u64> {
        let mut affected = 0;
        for chunk in Batches::new(covers, batch_size) {
            let sql = format!(
                "INSERT INTO custom_covers (library_id, path, group_table, sort_name, size, mtime, \
                 created_at, updated_at) VALUES {} \
                 ON CONFLICT(path) DO UPDATE SET \
                 group_table = excluded.group_table, \
                 sort_name = excluded.sort_name, \
                 size = excluded.size, \
                 mtime = excluded.mtime, \
                 updated_at = excluded.updated_at",
                value_rows(chunk.len(), 8)
            );
            let params: Vec<QueryValue> = chunk
                .iter()
                .flat_map(|cover| Self::insert_params(cover, now))
                .collect();
            affected += self.adapter.execute(&sql, &params).await?;
        }
        Ok(affected)
    }

    async fn ids_by_paths(
        &self,
        paths: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, i64>> {
        let mut ids = HashMap::with_capacity(paths.len());
        for chunk in Batches::new(paths, batch_size) {
            let sql = format!(
                "SELECT id, path FROM custom_covers WHERE path IN ({})",
                placeholders(chunk.len())
            );
            let params: Vec<QueryValue> = chunk.iter().map(QueryValue::from).collect();
            for row in self.adapter.query(&sql, &params).await? {
                ids.insert(get_string(&row, "path")?, get_i64(&row, "id")?);
            }
        }
        Ok(ids)
    }

    async fn ids_by_sort_names(
        &self,
        group: CoverGroup,
        sort_names: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, i64>> {
        let mut ids = HashMap::with_capacity(sort_names.len());
        for chunk in Batches::new(sort_names, batch_size) {
            let sql = format!(
                "SELECT id, sort_name FROM custom_covers \
                 WHERE group_table = ? AND sort_name IN ({}) ORDER BY id",
                placeholders(chunk.len())
            );
            let mut params = vec![QueryValue::from(group.table())];
            params.extend(chunk.iter().map(QueryValue::from));
            for row in self.adapter.query(&sql, &params).await? {
                ids.insert(get_string(&row, "sort_name")?, get_i64(&row, "id")?);
            }
        }
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn link_groups(&self, group: CoverGroup, now: i64) -> Result<u64> {
        let table = group.table();
        let matching = format!(
            "(SELECT c.id FROM custom_covers c \
             WHERE c.group_table = ? AND c.sort_name = {table}.sort_name \
             ORDER BY c.id DESC LIMIT 1)",
            table = table
        );
        let sql = format!(
            "UPDATE {table} SET custom_cover_id = {matching}, updated_at = ? \
             WHERE custom_cover_id IS NOT {matching}",
            table = table,
            matching = matching
        );
        let changed = self
            .adapter
            .execute(
                &sql,
                &[
                    QueryValue::from(table),
                    QueryValue::Integer(now),
                    QueryValue::from(table),
                ],
            )
            .await?;
        debug!(table, changed, "Custom covers linked");
        Ok(changed)
    }

    async fn move_paths(&self, moves: &[(String, String)], now: i64) -> Result<u64> {
        let params: Vec<[QueryValue; 5]> = moves
            .iter()
            .filter_map(|(from, to)| {
                let (group, sort_name) = CoverGroup::classify(to)?;
                Some([
                    QueryValue::from(to),
                    QueryValue::from(group.table()),
                    QueryValue::from(sort_name),
                    QueryValue::Integer(now),
                    QueryValue::from(from),
                ])
            })
            .collect();
        if params.is_empty() {
            return Ok(0);
        }

        let statements: Vec<(&str, &[QueryValue])> = params
            .iter()
            .map(|p| {
                (
                    "UPDATE custom_covers SET path = ?, group_table = ?, sort_name = ?, \
                     updated_at = ? WHERE path = ?",
                    &p[..],
                )
            })
            .collect();
        let results = self.adapter.execute_batch(&statements).await?;
        Ok(results.iter().sum())
    }

    async fn delete_by_paths(&self, paths: &[String], batch_size: usize) -> Result<u64> {
        let mut deleted = 0;
        for chunk in Batches::new(paths, batch_size) {
            let sql = format!(
                "DELETE FROM custom_covers WHERE path IN ({})",
                placeholders(chunk.len())
            );
            let params: Vec<QueryValue> = chunk.iter().map(QueryValue::from).collect();
            deleted += self.adapter.execute(&sql, &params).await?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{sort_name, LibraryId};
    use crate::repositories::test_support::adapter_with_library;

    fn cover(library_id: LibraryId, path: &str) -> CustomCover {
        let (group, sort_name) = CoverGroup::classify(path).unwrap();
        CustomCover {
            library_id,
            path: path.to_string(),
            group,
            sort_name,
            size: 10,
            mtime: None,
        }
    }

    async fn publisher_cover_id(adapter: &Arc<dyn DatabaseAdapter>) -> Option<i64> {
        adapter
            .query_one("SELECT custom_cover_id FROM publishers WHERE name = 'Image'", &[])
            .await
            .unwrap()
            .get("custom_cover_id")
            .and_then(QueryValue::as_i64)
    }

    #[tokio::test]
    async fn test_link_groups_by_sort_name() {
        let (adapter, library) = adapter_with_library().await;
        adapter
            .execute(
                "INSERT INTO publishers (name, sort_name, created_at, updated_at) \
                 VALUES ('Image', ?, 0, 0)",
                &[QueryValue::from(sort_name("Image"))],
            )
            .await
            .unwrap();
        let repo = SqliteCoverRepository::new(adapter.clone());

        repo.upsert(&[cover(library, "/lib/covers/publishers/image.png")], 1, 10)
            .await
            .unwrap();
        let id = repo
            .ids_by_paths(&["/lib/covers/publishers/image.png".to_string()], 10)
            .await
            .unwrap()["/lib/covers/publishers/image.png"];

        assert_eq!(repo.link_groups(CoverGroup::Publishers, 2).await.unwrap(), 1);
        assert_eq!(publisher_cover_id(&adapter).await, Some(id));
        assert_eq!(repo.link_groups(CoverGroup::Publishers, 3).await.unwrap(), 0);

        let by_sort = repo
            .ids_by_sort_names(CoverGroup::Publishers, &["image".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(by_sort["image"], id);

        repo.delete_by_paths(&["/lib/covers/publishers/image.png".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(publisher_cover_id(&adapter).await, None);
    }

    #[tokio::test]
    async fn test_move_reclassifies() {
        let (adapter, library) = adapter_with_library().await;
        let repo = SqliteCoverRepository::new(adapter);
        repo.upsert(&[cover(library, "/lib/covers/series/Saga.jpg")], 1, 10)
            .await
            .unwrap();

        let moved = repo
            .move_paths(
                &[
                    (
                        "/lib/covers/series/Saga.jpg".to_string(),
                        "/lib/covers/volumes/The Saga.jpg".to_string(),
                    ),
                    ("/lib/covers/series/x.jpg".to_string(), "/lib/x.jpg".to_string()),
                ],
                2,
            )
            .await
            .unwrap();

        assert_eq!(moved, 1);
        let ids = repo
            .ids_by_sort_names(CoverGroup::Volumes, &["saga".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
    }
}
