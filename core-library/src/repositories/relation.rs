//! Descriptor-driven relation repository
//!
//! One implementation serves every relation table: SQL is assembled from the
//! relation's [`RelationDescriptor`](crate::relations::RelationDescriptor).

use crate::batching::Batches;
use crate::error::Result;
use crate::relations::{
    or_predicate, ExtraKind, ExtraTuple, ExtraValue, IdentifierKey, KeyTuple, KeyValue, Relation,
    RelationDescriptor,
};
use crate::repositories::{get_i64, get_optional_string, value_rows};
use bridge_traits::database::{DatabaseAdapter, QueryRow, QueryValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// An existing relation row matched by key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRow {
    pub id: i64,
    pub extras: ExtraTuple,
}

/// Relation repository interface
#[async_trait::async_trait]
pub trait RelationRepository: Send + Sync {
    /// Fetch existing rows for `keys`, with their current extras
    ///
    /// Issues exactly `ceil(keys.len() / batch_size)` queries, each an OR of
    /// per-tuple predicates. Keys with no row are absent from the result.
    ///
    /// # Errors
    /// Any rejected batch query is returned as-is; no retry is attempted.
    async fn find_existing(
        &self,
        relation: Relation,
        keys: &[KeyTuple],
        batch_size: usize,
    ) -> Result<HashMap<KeyTuple, ExistingRow>>;

    /// Resolve `keys` to row ids, skipping keys with no row
    async fn find_ids(
        &self,
        relation: Relation,
        keys: &[KeyTuple],
        batch_size: usize,
    ) -> Result<HashMap<KeyTuple, i64>>;

    /// Insert rows, updating extras of rows whose unique key already exists
    ///
    /// Each row holds one value per
    /// [`insert_columns`](RelationDescriptor::insert_columns) entry.
    ///
    /// # Returns
    /// Total rows affected.
    async fn upsert(
        &self,
        relation: Relation,
        rows: &[Vec<QueryValue>],
        batch_size: usize,
    ) -> Result<u64>;
}

/// SQLite implementation of RelationRepository
pub struct SqliteRelationRepository {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl SqliteRelationRepository {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    fn read_key(descriptor: &RelationDescriptor, row: &QueryRow) -> Result<KeyTuple> {
        (0..descriptor.key_arity())
            .map(|i| match row.get(&format!("k{}", i)) {
                Some(value) => KeyValue::from_query_value(value),
                None => Ok(KeyValue::Null),
            })
            .collect()
    }

    fn read_extras(descriptor: &RelationDescriptor, row: &QueryRow) -> Result<ExtraTuple> {
        descriptor
            .extras
            .iter()
            .enumerate()
            .map(|(i, extra)| match extra.kind {
                ExtraKind::Identifier => {
                    let source = get_optional_string(row, &format!("e{}_source", i))?;
                    let id_type = get_optional_string(row, &format!("e{}_type", i))?;
                    let key = get_optional_string(row, &format!("e{}_key", i))?;
                    Ok(match (source, id_type, key) {
                        (Some(source), Some(id_type), Some(key)) => {
                            ExtraValue::Identifier(IdentifierKey::new(source, id_type, key))
                        }
                        _ => ExtraValue::Null,
                    })
                }
                ExtraKind::Scalar | ExtraKind::Count => Ok(match row.get(&format!("e{}", i)) {
                    Some(QueryValue::Integer(v)) => ExtraValue::Int(*v),
                    Some(QueryValue::Real(v)) => ExtraValue::Int(*v as i64),
                    Some(QueryValue::Text(v)) => ExtraValue::Text(v.clone()),
                    _ => ExtraValue::Null,
                }),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl RelationRepository for SqliteRelationRepository {
    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    async fn find_existing(
        &self,
        relation: Relation,
        keys: &[KeyTuple],
        batch_size: usize,
    ) -> Result<HashMap<KeyTuple, ExistingRow>> {
        let descriptor = relation.descriptor();
        let base = descriptor.existing_rows_sql();
        let mut found = HashMap::with_capacity(keys.len());

        for chunk in Batches::new(keys, batch_size) {
            let (predicate, params) = or_predicate(descriptor.key_select, chunk);
            let sql = format!("{} WHERE {}", base, predicate);
            for row in self.adapter.query(&sql, &params).await? {
                let id = get_i64(&row, "id")?;
                let extras = Self::read_extras(descriptor, &row)?;
                found.insert(Self::read_key(descriptor, &row)?, ExistingRow { id, extras });
            }
        }

        debug!(%relation, matched = found.len(), "Existing rows resolved");
        Ok(found)
    }

    async fn find_ids(
        &self,
        relation: Relation,
        keys: &[KeyTuple],
        batch_size: usize,
    ) -> Result<HashMap<KeyTuple, i64>> {
        let descriptor = relation.descriptor();
        let select: Vec<String> = descriptor
            .key_select
            .iter()
            .enumerate()
            .map(|(i, expr)| format!("{} AS k{}", expr, i))
            .collect();
        let base = format!(
            "SELECT t.id AS id, {} FROM {}",
            select.join(", "),
            descriptor.from_clause
        );
        let mut ids = HashMap::with_capacity(keys.len());

        for chunk in Batches::new(keys, batch_size) {
            let (predicate, params) = or_predicate(descriptor.key_select, chunk);
            let sql = format!("{} WHERE {}", base, predicate);
            for row in self.adapter.query(&sql, &params).await? {
                ids.insert(Self::read_key(descriptor, &row)?, get_i64(&row, "id")?);
            }
        }

        Ok(ids)
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert(
        &self,
        relation: Relation,
        rows: &[Vec<QueryValue>],
        batch_size: usize,
    ) -> Result<u64> {
        let descriptor = relation.descriptor();
        let columns = descriptor.insert_columns();
        let assignments = descriptor.update_assignments();
        let conflict = if assignments.is_empty() {
            "ON CONFLICT DO NOTHING".to_string()
        } else {
            format!("ON CONFLICT DO UPDATE SET {}", assignments.join(", "))
        };

        let mut affected = 0;
        for chunk in Batches::new(rows, batch_size) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {} {}",
                descriptor.table,
                columns.join(", "),
                value_rows(chunk.len(), columns.len()),
                conflict
            );
            let params: Vec<QueryValue> = chunk.iter().flatten().cloned().collect();
            affected += self.adapter.execute(&sql, &params).await?;
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::adapter_with_library;
    use bridge_traits::error::Result as BridgeResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Adapter wrapper counting issued queries
    struct CountingAdapter {
        inner: Arc<dyn DatabaseAdapter>,
        queries: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DatabaseAdapter for CountingAdapter {
        async fn health_check(&self) -> BridgeResult<()> {
            self.inner.health_check().await
        }

        async fn query(&self, query: &str, params: &[QueryValue]) -> BridgeResult<Vec<QueryRow>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.query(query, params).await
        }

        async fn execute(&self, statement: &str, params: &[QueryValue]) -> BridgeResult<u64> {
            self.inner.execute(statement, params).await
        }

        async fn execute_batch(
            &self,
            statements: &[(&str, &[QueryValue])],
        ) -> BridgeResult<Vec<u64>> {
            self.inner.execute_batch(statements).await
        }
    }

    fn name_row(name: &str) -> Vec<QueryValue> {
        vec![
            QueryValue::from(name),
            QueryValue::Null,
            QueryValue::from(0i64),
            QueryValue::from(0i64),
        ]
    }

    #[tokio::test]
    async fn test_existence_queries_are_batched() {
        let (adapter, _) = adapter_with_library().await;
        let counting = Arc::new(CountingAdapter {
            inner: adapter,
            queries: AtomicUsize::new(0),
        });
        let repo = SqliteRelationRepository::new(counting.clone());

        let rows: Vec<Vec<QueryValue>> = (0..10).map(|i| name_row(&format!("tag-{}", i))).collect();
        repo.upsert(Relation::Tag, &rows, 500).await.unwrap();

        let keys: Vec<KeyTuple> = (0..2500)
            .map(|i| vec![KeyValue::text(format!("tag-{}", i))])
            .collect();
        let found = repo.find_existing(Relation::Tag, &keys, 1000).await.unwrap();

        assert_eq!(counting.queries.load(Ordering::SeqCst), 3);
        assert_eq!(found.len(), 10);
    }

    #[tokio::test]
    async fn test_find_existing_reads_identifier_extra() {
        let (adapter, _) = adapter_with_library().await;
        let repo = SqliteRelationRepository::new(adapter.clone());

        repo.upsert(Relation::IdentifierSource, &[vec![
            QueryValue::from("comicvine"),
            QueryValue::from(0i64),
            QueryValue::from(0i64),
        ]], 100)
        .await
        .unwrap();
        let source_id = repo
            .find_ids(Relation::IdentifierSource, &[vec![KeyValue::text("comicvine")]], 100)
            .await
            .unwrap()[&vec![KeyValue::text("comicvine")]];
        repo.upsert(Relation::Identifier, &[vec![
            QueryValue::from(source_id),
            QueryValue::from("series"),
            QueryValue::from("4050-1"),
            QueryValue::Null,
            QueryValue::from(0i64),
            QueryValue::from(0i64),
        ]], 100)
        .await
        .unwrap();
        let identifier = IdentifierKey::new("comicvine", "series", "4050-1");
        let identifier_id = repo
            .find_ids(Relation::Identifier, &[identifier.key_tuple()], 100)
            .await
            .unwrap()[&identifier.key_tuple()];

        repo.upsert(Relation::Tag, &[vec![
            QueryValue::from("Noir"),
            QueryValue::from(identifier_id),
            QueryValue::from(0i64),
            QueryValue::from(0i64),
        ]], 100)
        .await
        .unwrap();

        let key = vec![KeyValue::text("Noir")];
        let found = repo
            .find_existing(Relation::Tag, &[key.clone()], 100)
            .await
            .unwrap();
        assert_eq!(found[&key].extras, vec![ExtraValue::Identifier(identifier)]);
    }

    #[tokio::test]
    async fn test_upsert_conflict_becomes_update() {
        let (adapter, _) = adapter_with_library().await;
        let repo = SqliteRelationRepository::new(adapter.clone());

        let row = |url: &str| {
            vec![
                QueryValue::from("Nightwing"),
                QueryValue::Null,
                QueryValue::from(url),
                QueryValue::from(0i64),
                QueryValue::from(0i64),
            ]
        };
        repo.upsert(Relation::Universe, &[row("Earth-1")], 100).await.unwrap();
        repo.upsert(Relation::Universe, &[row("Earth-2")], 100).await.unwrap();

        let key = vec![KeyValue::text("Nightwing")];
        let found = repo
            .find_existing(Relation::Universe, &[key.clone()], 100)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&key].extras[1], ExtraValue::Text("Earth-2".to_string()));
    }

    #[tokio::test]
    async fn test_count_never_regresses_on_upsert() {
        let (adapter, _) = adapter_with_library().await;
        let repo = SqliteRelationRepository::new(adapter.clone());
        let meta = |v: i64| vec![QueryValue::from(v), QueryValue::from(v)];

        let mut publisher = vec![QueryValue::from("Image"), QueryValue::Null];
        publisher.extend([QueryValue::from("image"), QueryValue::Null]);
        publisher.extend(meta(0));
        repo.upsert(Relation::Publisher, &[publisher], 10).await.unwrap();
        let publisher_id = repo
            .find_ids(Relation::Publisher, &[vec![KeyValue::text("Image")]], 10)
            .await
            .unwrap()[&vec![KeyValue::text("Image")]];

        let mut imprint = vec![QueryValue::from(publisher_id), QueryValue::from(""), QueryValue::Null];
        imprint.extend([QueryValue::from(""), QueryValue::Null]);
        imprint.extend(meta(0));
        repo.upsert(Relation::Imprint, &[imprint], 10).await.unwrap();
        let imprint_key = vec![KeyValue::text("Image"), KeyValue::text("")];
        let imprint_id = repo
            .find_ids(Relation::Imprint, &[imprint_key.clone()], 10)
            .await
            .unwrap()[&imprint_key];

        let series = |count: Option<i64>| {
            let mut row = vec![
                QueryValue::from(imprint_id),
                QueryValue::from("Saga"),
                QueryValue::Null,
                QueryValue::from(count),
                QueryValue::from("saga"),
                QueryValue::Null,
            ];
            row.extend(meta(0));
            row
        };
        repo.upsert(Relation::Series, &[series(Some(9))], 10).await.unwrap();
        repo.upsert(Relation::Series, &[series(Some(3))], 10).await.unwrap();
        repo.upsert(Relation::Series, &[series(None)], 10).await.unwrap();

        let key = vec![KeyValue::text("Image"), KeyValue::text(""), KeyValue::text("Saga")];
        let found = repo
            .find_existing(Relation::Series, &[key.clone()], 10)
            .await
            .unwrap();
        assert_eq!(found[&key].extras[1], ExtraValue::Int(9));
    }

    #[tokio::test]
    async fn test_nullable_key_part_matches_with_is_null() {
        let (adapter, _) = adapter_with_library().await;
        let repo = SqliteRelationRepository::new(adapter.clone());

        repo.upsert(Relation::CreditPerson, &[name_row("Moore")], 10).await.unwrap();
        let person_id = repo
            .find_ids(Relation::CreditPerson, &[vec![KeyValue::text("Moore")]], 10)
            .await
            .unwrap()[&vec![KeyValue::text("Moore")]];

        let credit = vec![
            QueryValue::from(person_id),
            QueryValue::Null,
            QueryValue::from(0i64),
            QueryValue::from(0i64),
        ];
        repo.upsert(Relation::Credit, &[credit.clone()], 10).await.unwrap();
        repo.upsert(Relation::Credit, &[credit], 10).await.unwrap();

        let rows = adapter
            .query("SELECT COUNT(*) AS n FROM credits", &[])
            .await
            .unwrap();
        assert_eq!(rows[0].get("n").and_then(QueryValue::as_i64), Some(1));

        let key = vec![KeyValue::text("Moore"), KeyValue::Null];
        let found = repo.find_existing(Relation::Credit, &[key.clone()], 10).await.unwrap();
        assert!(found.contains_key(&key));
    }
}
