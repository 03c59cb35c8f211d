//! # Bulk Writer
//!
//! Materializes the create and update buckets in dependency order.
//!
//! ## Write order
//!
//! Relations are written by descriptor rank: named leaves and identifier
//! sources, then identifiers, then the group chain strictly
//! Publisher → Imprint → Series → Volume, then identified entities, and
//! finally composites built from other entities (credits, story arc
//! numbers). Every row resolves its parent and identifier references by
//! lookup just before its relation is written, so a parent written earlier
//! in the same run is always found.
//!
//! ## Failures
//!
//! A row whose references cannot be resolved is logged as a
//! [`RowPrepareError`] and skipped; the rest of its batch is written. A
//! rejected lookup or upsert statement aborts the phase. The abort signal is
//! checked before every upsert batch.

use crate::error::{Result, RowPrepareError, SyncError};
use crate::resolver::{RelationWork, WorkBuckets};
use bridge_traits::database::QueryValue;
use core_library::relations::KeyPart;
use core_library::repositories::{CoverRepository, RelationRepository};
use core_library::{
    sort_name, Batches, CoverGroup, ExtraTuple, ExtraValue, KeyTuple, KeyValue, Relation,
    RelationDescriptor,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What the writer did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    /// Ids of rows whose extras were rewritten, per relation
    pub updated_ids: BTreeMap<Relation, Vec<i64>>,
}

/// Cover directory matching a sortable group relation
pub fn cover_group(relation: Relation) -> Option<CoverGroup> {
    match relation {
        Relation::Publisher => Some(CoverGroup::Publishers),
        Relation::Imprint => Some(CoverGroup::Imprints),
        Relation::Series => Some(CoverGroup::Series),
        Relation::Volume => Some(CoverGroup::Volumes),
        _ => None,
    }
}

/// Lookups needed to turn one relation's rows into column values
#[derive(Default)]
struct References {
    /// Parent ids keyed by the key-part index they fill
    parents: HashMap<usize, HashMap<KeyTuple, i64>>,
    identifiers: HashMap<KeyTuple, i64>,
    covers: HashMap<String, i64>,
}

/// Key values of each `KeyPart`, in key-part order
fn split_key<'a>(descriptor: &RelationDescriptor, key: &'a KeyTuple) -> Vec<&'a [KeyValue]> {
    let mut offset = 0;
    descriptor
        .key_parts
        .iter()
        .map(|part| {
            let arity = match part {
                KeyPart::Column(_) => 1,
                KeyPart::Parent { arity, .. } => *arity,
            };
            let end = (offset + arity).min(key.len());
            let slice = &key[offset.min(end)..end];
            offset = end;
            slice
        })
        .collect()
}

fn row_name(key: &KeyTuple) -> &str {
    key.last().and_then(KeyValue::as_text).unwrap_or_default()
}

pub struct BulkWriter {
    relations: Arc<dyn RelationRepository>,
    covers: Arc<dyn CoverRepository>,
    query_batch_size: usize,
    write_batch_size: usize,
}

impl BulkWriter {
    pub fn new(
        relations: Arc<dyn RelationRepository>,
        covers: Arc<dyn CoverRepository>,
        query_batch_size: usize,
        write_batch_size: usize,
    ) -> Self {
        Self {
            relations,
            covers,
            query_batch_size,
            write_batch_size,
        }
    }

    /// Write every bucket in rank order
    #[instrument(skip_all, fields(creates = buckets.creates(), updates = buckets.updates()))]
    pub async fn write(
        &self,
        buckets: &WorkBuckets,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<WriteReport> {
        let mut report = WriteReport::default();
        for relation in Relation::all_in_write_order() {
            let Some(work) = buckets.get(relation) else {
                continue;
            };
            if work.is_empty() {
                continue;
            }
            self.write_relation(relation, work, now, &mut report, cancel)
                .await?;
        }

        info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            "Relation rows written"
        );
        Ok(report)
    }

    async fn write_relation(
        &self,
        relation: Relation,
        work: &RelationWork,
        now: i64,
        report: &mut WriteReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let descriptor = relation.descriptor();
        let rows: Vec<(&KeyTuple, &ExtraTuple)> = work
            .to_create
            .iter()
            .chain(work.to_update.iter().map(|(key, update)| (key, &update.extras)))
            .collect();
        let references = self.references(descriptor, &rows).await?;

        let mut creates = Vec::with_capacity(work.to_create.len());
        for (key, extras) in &work.to_create {
            match Self::prepare(descriptor, key, extras, &references, now) {
                Ok(row) => creates.push(row),
                Err(err) => {
                    warn!(error = %err, "Row skipped");
                    report.skipped += 1;
                }
            }
        }

        let mut updates = Vec::with_capacity(work.to_update.len());
        let mut updated_ids = Vec::with_capacity(work.to_update.len());
        for (key, update) in &work.to_update {
            match Self::prepare(descriptor, key, &update.extras, &references, now) {
                Ok(row) => {
                    updates.push(row);
                    updated_ids.push(update.id);
                }
                Err(err) => {
                    warn!(error = %err, "Row skipped");
                    report.skipped += 1;
                }
            }
        }

        if !creates.is_empty() {
            report.created += self.upsert(relation, &creates, cancel).await?;
        }
        if !updates.is_empty() {
            report.updated += self.upsert(relation, &updates, cancel).await?;
            report
                .updated_ids
                .entry(relation)
                .or_default()
                .extend(updated_ids);
        }

        debug!(%relation, created = creates.len(), updated = updates.len(), "Relation written");
        Ok(())
    }

    async fn upsert(
        &self,
        relation: Relation,
        rows: &[Vec<QueryValue>],
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut affected = 0;
        for chunk in Batches::new(rows, self.write_batch_size) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            affected += self
                .relations
                .upsert(relation, chunk, self.write_batch_size)
                .await?;
        }
        Ok(affected)
    }

    /// Batch-resolve parents, identifiers and covers for `rows`
    async fn references(
        &self,
        descriptor: &RelationDescriptor,
        rows: &[(&KeyTuple, &ExtraTuple)],
    ) -> Result<References> {
        let relation = descriptor.relation;
        let mut references = References::default();

        for (index, part) in descriptor.key_parts.iter().enumerate() {
            let KeyPart::Parent {
                relation: parent, ..
            } = part
            else {
                continue;
            };
            let keys: BTreeSet<KeyTuple> = rows
                .iter()
                .map(|(key, _)| split_key(descriptor, key)[index].to_vec())
                .filter(|slice| slice.iter().any(|v| *v != KeyValue::Null))
                .collect();
            let keys: Vec<KeyTuple> = keys.into_iter().collect();
            let ids = self
                .relations
                .find_ids(*parent, &keys, self.query_batch_size)
                .await
                .map_err(|err| SyncError::query_batch(*parent, err))?;
            references.parents.insert(index, ids);
        }

        let identifiers: BTreeSet<KeyTuple> = rows
            .iter()
            .flat_map(|(_, extras)| extras.iter())
            .filter_map(ExtraValue::as_identifier)
            .map(|identifier| identifier.key_tuple())
            .collect();
        if !identifiers.is_empty() {
            let keys: Vec<KeyTuple> = identifiers.into_iter().collect();
            references.identifiers = self
                .relations
                .find_ids(Relation::Identifier, &keys, self.query_batch_size)
                .await
                .map_err(|err| SyncError::query_batch(Relation::Identifier, err))?;
        }

        if let Some(group) = cover_group(relation).filter(|_| descriptor.sortable) {
            let names: BTreeSet<String> = rows
                .iter()
                .map(|(key, _)| sort_name(row_name(key)))
                .filter(|name| !name.is_empty())
                .collect();
            if !names.is_empty() {
                let names: Vec<String> = names.into_iter().collect();
                references.covers = self
                    .covers
                    .ids_by_sort_names(group, &names, self.query_batch_size)
                    .await
                    .map_err(|err| SyncError::query_batch(relation, err))?;
            }
        }

        Ok(references)
    }

    /// Column values for one row, in `insert_columns` order
    fn prepare(
        descriptor: &RelationDescriptor,
        key: &KeyTuple,
        extras: &ExtraTuple,
        references: &References,
        now: i64,
    ) -> std::result::Result<Vec<QueryValue>, RowPrepareError> {
        let relation = descriptor.relation;
        if key.len() != descriptor.key_arity() {
            return Err(RowPrepareError::new(
                relation,
                key,
                format!("expected {} key values", descriptor.key_arity()),
            ));
        }

        let mut values = Vec::with_capacity(descriptor.insert_columns().len());
        for (index, (part, slice)) in descriptor
            .key_parts
            .iter()
            .zip(split_key(descriptor, key))
            .enumerate()
        {
            match part {
                KeyPart::Column(_) => values.push(
                    slice
                        .first()
                        .map(KeyValue::to_query_value)
                        .unwrap_or(QueryValue::Null),
                ),
                KeyPart::Parent {
                    relation: parent, ..
                } => {
                    if slice.iter().all(|v| *v == KeyValue::Null) {
                        values.push(QueryValue::Null);
                        continue;
                    }
                    let id = references
                        .parents
                        .get(&index)
                        .and_then(|ids| ids.get(slice))
                        .ok_or_else(|| {
                            RowPrepareError::new(relation, key, format!("no {} row", parent))
                        })?;
                    values.push(QueryValue::Integer(*id));
                }
            }
        }

        for (field, value) in descriptor.extras.iter().zip(extras.iter()) {
            values.push(match value {
                ExtraValue::Null => QueryValue::Null,
                ExtraValue::Int(i) => QueryValue::Integer(*i),
                ExtraValue::Text(s) => QueryValue::Text(s.clone()),
                ExtraValue::Identifier(identifier) => {
                    let id = references
                        .identifiers
                        .get(&identifier.key_tuple())
                        .ok_or_else(|| {
                            RowPrepareError::new(
                                relation,
                                key,
                                format!(
                                    "no identifier {}:{}:{} for {}",
                                    identifier.source,
                                    identifier.id_type,
                                    identifier.key,
                                    field.column
                                ),
                            )
                        })?;
                    QueryValue::Integer(*id)
                }
            });
        }
        if extras.len() < descriptor.extras.len() {
            return Err(RowPrepareError::new(relation, key, "missing extra values"));
        }

        if descriptor.sortable {
            let sortable = sort_name(row_name(key));
            let cover = references.covers.get(&sortable).copied();
            values.push(QueryValue::Text(sortable));
            values.push(QueryValue::from(cover));
        }
        values.push(QueryValue::Integer(now));
        values.push(QueryValue::Integer(now));
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{MissingRelationResolver, PendingUpdate};
    use crate::test_support::catalog;
    use async_trait::async_trait;
    use core_library::models::CustomCover;
    use core_library::repositories::ExistingRow;
    use core_library::IdentifierKey;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn text(values: &[&str]) -> KeyTuple {
        values.iter().map(|v| KeyValue::text(*v)).collect()
    }

    #[test]
    fn test_split_key_follows_parent_arity() {
        let descriptor = Relation::Volume.descriptor();
        let key = text(&["DC", "", "Sandman", "1989"]);
        let parts = split_key(descriptor, &key);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 3);
        assert_eq!(parts[1], &[KeyValue::text("1989")][..]);
    }

    #[test]
    fn test_prepare_reports_missing_parent() {
        let descriptor = Relation::Imprint.descriptor();
        let err = BulkWriter::prepare(
            descriptor,
            &text(&["Ghost Press", "Vertigo"]),
            &vec![ExtraValue::Null],
            &References::default(),
            1,
        )
        .unwrap_err();
        assert_eq!(err.relation, "imprints");
        assert!(err.reason.contains("publishers"));
    }

    #[test]
    fn test_prepare_null_parent_is_null_column() {
        let descriptor = Relation::Credit.descriptor();
        let mut references = References::default();
        references
            .parents
            .insert(0, [(text(&["Neil Gaiman"]), 9)].into_iter().collect());

        let row = BulkWriter::prepare(
            descriptor,
            &vec![KeyValue::text("Neil Gaiman"), KeyValue::Null],
            &vec![],
            &references,
            5,
        )
        .unwrap();
        assert_eq!(
            row,
            vec![
                QueryValue::Integer(9),
                QueryValue::Null,
                QueryValue::Integer(5),
                QueryValue::Integer(5)
            ]
        );
    }

    #[test]
    fn test_prepare_reports_missing_identifier() {
        let err = BulkWriter::prepare(
            Relation::Tag.descriptor(),
            &text(&["space"]),
            &vec![ExtraValue::Identifier(IdentifierKey::new("metron", "tag", "4"))],
            &References::default(),
            1,
        )
        .unwrap_err();
        assert!(err.reason.contains("metron:tag:4"));
    }

    #[test]
    fn test_cover_group_mapping() {
        assert_eq!(cover_group(Relation::Series), Some(CoverGroup::Series));
        assert_eq!(cover_group(Relation::Tag), None);
    }

    fn create(relation: Relation, key: KeyTuple, extras: ExtraTuple) -> (Relation, RelationWork) {
        let mut work = RelationWork::default();
        work.to_create.insert(key, extras);
        (relation, work)
    }

    #[tokio::test]
    async fn test_group_chain_written_parent_first_with_cover() {
        let catalog = catalog().await;
        catalog
            .covers
            .upsert(
                &[CustomCover {
                    library_id: catalog.library_id,
                    path: "/lib/covers/series/The Sandman.jpg".to_string(),
                    group: CoverGroup::Series,
                    sort_name: "sandman".to_string(),
                    size: 10,
                    mtime: None,
                }],
                1,
                10,
            )
            .await
            .unwrap();

        let mut buckets = WorkBuckets::default();
        for (relation, work) in [
            create(Relation::Volume, text(&["DC", "Vertigo", "The Sandman", "1989"]), vec![ExtraValue::Int(75)]),
            create(Relation::Publisher, text(&["DC"]), vec![ExtraValue::Null]),
            create(Relation::Series, text(&["DC", "Vertigo", "The Sandman"]), vec![ExtraValue::Null, ExtraValue::Null]),
            create(Relation::Imprint, text(&["DC", "Vertigo"]), vec![ExtraValue::Null]),
        ] {
            buckets.insert(relation, work);
        }

        let writer = BulkWriter::new(catalog.relations.clone(), catalog.covers.clone(), 100, 100);
        let report = writer
            .write(&buckets, 7, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.created, 4);
        assert_eq!(report.skipped, 0);

        let series = catalog
            .adapter
            .query(
                "SELECT s.sort_name, s.custom_cover_id, i.name AS imprint \
                 FROM series s JOIN imprints i ON i.id = s.imprint_id",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0]["sort_name"], QueryValue::from("sandman"));
        assert!(matches!(series[0]["custom_cover_id"], QueryValue::Integer(_)));
        assert_eq!(series[0]["imprint"], QueryValue::from("Vertigo"));
    }

    #[tokio::test]
    async fn test_unresolvable_row_is_skipped_batch_continues() {
        let catalog = catalog().await;
        let mut buckets = WorkBuckets::default();
        let mut work = RelationWork::default();
        work.to_create.insert(text(&["space"]), vec![ExtraValue::Null]);
        work.to_create.insert(
            text(&["time"]),
            vec![ExtraValue::Identifier(IdentifierKey::new("gcd", "tag", "missing"))],
        );
        buckets.insert(Relation::Tag, work);

        let writer = BulkWriter::new(catalog.relations.clone(), catalog.covers.clone(), 100, 100);
        let report = writer
            .write(&buckets, 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 1);
        let ids = catalog
            .relations
            .find_ids(Relation::Tag, &[text(&["space"]), text(&["time"])], 10)
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_updates_rewrite_extras_and_report_ids() {
        let catalog = catalog().await;
        let resolver = MissingRelationResolver::new(catalog.relations.clone(), 100);
        let writer = BulkWriter::new(catalog.relations.clone(), catalog.covers.clone(), 100, 100);

        let mut buckets = WorkBuckets::default();
        buckets.insert(
            Relation::Universe,
            create(Relation::Universe, text(&["Earth"]), vec![ExtraValue::Null, ExtraValue::Null]).1,
        );
        writer.write(&buckets, 1, &CancellationToken::new()).await.unwrap();

        let proposals = [(
            text(&["Earth"]),
            [vec![ExtraValue::Null, ExtraValue::Text("616".to_string())]]
                .into_iter()
                .collect::<BTreeSet<_>>(),
        )]
        .into_iter()
        .collect();
        let work = resolver
            .resolve(Relation::Universe, &proposals, &CancellationToken::new())
            .await
            .unwrap();
        let PendingUpdate { id, .. } = work.to_update[&text(&["Earth"])].clone();

        let mut buckets = WorkBuckets::default();
        buckets.insert(Relation::Universe, work);
        let report = writer.write(&buckets, 2, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.updated_ids[&Relation::Universe], vec![id]);
        let rows = catalog
            .adapter
            .query("SELECT designation FROM universes", &[])
            .await
            .unwrap();
        assert_eq!(rows[0]["designation"], QueryValue::from("616"));
    }

    /// Fires `cancel` once the first upsert statement has run
    struct CancelOnUpsert {
        inner: Arc<dyn RelationRepository>,
        cancel: CancellationToken,
        upserts: AtomicUsize,
    }

    #[async_trait]
    impl RelationRepository for CancelOnUpsert {
        async fn find_existing(
            &self,
            relation: Relation,
            keys: &[KeyTuple],
            batch_size: usize,
        ) -> core_library::Result<HashMap<KeyTuple, ExistingRow>> {
            self.inner.find_existing(relation, keys, batch_size).await
        }

        async fn find_ids(
            &self,
            relation: Relation,
            keys: &[KeyTuple],
            batch_size: usize,
        ) -> core_library::Result<HashMap<KeyTuple, i64>> {
            self.inner.find_ids(relation, keys, batch_size).await
        }

        async fn upsert(
            &self,
            relation: Relation,
            rows: &[Vec<QueryValue>],
            batch_size: usize,
        ) -> core_library::Result<u64> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            let affected = self.inner.upsert(relation, rows, batch_size).await?;
            self.cancel.cancel();
            Ok(affected)
        }
    }

    #[tokio::test]
    async fn test_cancel_between_upsert_batches() {
        let catalog = catalog().await;
        let cancel = CancellationToken::new();
        let relations = Arc::new(CancelOnUpsert {
            inner: catalog.relations.clone(),
            cancel: cancel.clone(),
            upserts: AtomicUsize::new(0),
        });
        let writer = BulkWriter::new(relations.clone(), catalog.covers.clone(), 100, 2);

        let mut work = RelationWork::default();
        for name in ["a", "b", "c", "d", "e"] {
            work.to_create.insert(text(&[name]), vec![ExtraValue::Null]);
        }
        let mut buckets = WorkBuckets::default();
        buckets.insert(Relation::Tag, work);

        let err = writer.write(&buckets, 1, &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(relations.upserts.load(Ordering::SeqCst), 1);
        let rows = catalog
            .adapter
            .query("SELECT COUNT(*) AS n FROM tags", &[])
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], QueryValue::Integer(2));
    }
}
