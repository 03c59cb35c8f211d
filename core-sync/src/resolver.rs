//! # Missing Relation Resolver
//!
//! Splits each relation's proposal set into rows to create, rows to update
//! and rows already up to date.
//!
//! For `N` proposed key tuples and a query batch size `B`, exactly
//! `ceil(N / B)` existence queries are issued per relation. Keys with no row
//! become creates; matched keys go through [`merge`](crate::merger::merge)
//! and become updates only when the merged extras differ.
//!
//! A rejected existence query ends the run with
//! [`SyncError::QueryBatch`]; nothing is retried. The abort signal is checked
//! before every batch.

use crate::error::{Result, SyncError};
use crate::merger::merge;
use core_library::repositories::RelationRepository;
use core_library::{Batches, ExtraTuple, KeyTuple, Relation};
use core_metadata::{ProposalSet, Proposals};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// An existing row whose extras must be rewritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub id: i64,
    pub extras: ExtraTuple,
}

/// Create/update split for one relation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationWork {
    pub to_create: BTreeMap<KeyTuple, ExtraTuple>,
    pub to_update: BTreeMap<KeyTuple, PendingUpdate>,
    pub unchanged: usize,
}

impl RelationWork {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty()
    }
}

/// Work for every relation of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkBuckets {
    relations: BTreeMap<Relation, RelationWork>,
}

impl WorkBuckets {
    pub fn get(&self, relation: Relation) -> Option<&RelationWork> {
        self.relations.get(&relation)
    }

    pub fn insert(&mut self, relation: Relation, work: RelationWork) {
        self.relations.insert(relation, work);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Relation, &RelationWork)> {
        self.relations.iter().map(|(relation, work)| (*relation, work))
    }

    pub fn creates(&self) -> usize {
        self.relations.values().map(|w| w.to_create.len()).sum()
    }

    pub fn updates(&self) -> usize {
        self.relations.values().map(|w| w.to_update.len()).sum()
    }
}

pub struct MissingRelationResolver {
    relations: Arc<dyn RelationRepository>,
    batch_size: usize,
}

impl MissingRelationResolver {
    pub fn new(relations: Arc<dyn RelationRepository>, batch_size: usize) -> Self {
        Self {
            relations,
            batch_size,
        }
    }

    /// Classify one relation's proposals against the catalog
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::QueryBatch`] if any existence query is rejected,
    /// and [`SyncError::Cancelled`] if `cancel` fires between batches.
    #[instrument(skip(self, proposals, cancel), fields(keys = proposals.len()))]
    pub async fn resolve(
        &self,
        relation: Relation,
        proposals: &ProposalSet,
        cancel: &CancellationToken,
    ) -> Result<RelationWork> {
        let keys: Vec<KeyTuple> = proposals.keys().cloned().collect();
        let mut existing = HashMap::with_capacity(keys.len());
        for chunk in Batches::new(&keys, self.batch_size) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let found = self
                .relations
                .find_existing(relation, chunk, self.batch_size)
                .await
                .map_err(|err| SyncError::query_batch(relation, err))?;
            existing.extend(found);
        }

        let mut work = RelationWork::default();
        for (key, proposed) in proposals {
            match existing.get(key) {
                None => {
                    let outcome = merge(relation, None, proposed);
                    work.to_create.insert(key.clone(), outcome.merged);
                }
                Some(row) => {
                    let outcome = merge(relation, Some(&row.extras), proposed);
                    if outcome.do_update {
                        work.to_update.insert(
                            key.clone(),
                            PendingUpdate {
                                id: row.id,
                                extras: outcome.merged,
                            },
                        );
                    } else {
                        work.unchanged += 1;
                    }
                }
            }
        }

        debug!(
            %relation,
            create = work.to_create.len(),
            update = work.to_update.len(),
            unchanged = work.unchanged,
            "Relation proposals classified"
        );
        Ok(work)
    }

    /// Classify every relation in write order
    pub async fn resolve_all(
        &self,
        proposals: &Proposals,
        cancel: &CancellationToken,
    ) -> Result<WorkBuckets> {
        let mut buckets = WorkBuckets::default();
        for relation in Relation::all_in_write_order() {
            let Some(set) = proposals.get(relation) else {
                continue;
            };
            if set.is_empty() {
                continue;
            }
            buckets.insert(relation, self.resolve(relation, set, cancel).await?);
        }
        Ok(buckets)
    }
}
