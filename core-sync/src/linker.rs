//! # Link Synchronizer
//!
//! Reconciles association tables against the targets proposed for each
//! comic in this run.
//!
//! For every comic and association table: existing targets that are still
//! proposed are left alone, existing targets no longer proposed are deleted,
//! and proposed targets not yet linked are created. Deletes always run before
//! creates. Rows are written in bulk against the association table, and the
//! abort signal is checked before every batch.
//!
//! Folder links carry the full ancestor chain, so a rescanned comic that did
//! not move produces no folder writes.

use crate::error::{LinkResolutionError, Result, SyncError};
use core_library::relations::{LinkTable, FOLDER_LINK};
use core_library::repositories::{
    ComicRepository, LinkPair, LinkRepository, Protagonists, RelationRepository,
};
use core_library::{Batches, ComicId, KeyTuple, KeyValue, Relation};
use core_metadata::NormalizedComic;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// What the synchronizer wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub created: u64,
    pub deleted: u64,
    /// Proposed targets with no row, dropped
    pub dropped: u64,
    /// Comics whose main character or team changed
    pub protagonists: BTreeSet<ComicId>,
}

impl LinkReport {
    fn add(&mut self, other: LinkReport) {
        self.created += other.created;
        self.deleted += other.deleted;
        self.dropped += other.dropped;
        self.protagonists.extend(other.protagonists);
    }
}

/// Deletes and creates turning `existing` into `proposed`
pub fn diff_links(
    proposed: &BTreeMap<ComicId, BTreeSet<i64>>,
    existing: &HashMap<ComicId, BTreeSet<i64>>,
) -> (Vec<LinkPair>, Vec<LinkPair>) {
    let empty = BTreeSet::new();
    let mut deletes = Vec::new();
    let mut creates = Vec::new();
    for (comic, targets) in proposed {
        let current = existing.get(comic).unwrap_or(&empty);
        deletes.extend(current.difference(targets).map(|target| (*comic, *target)));
        creates.extend(targets.difference(current).map(|target| (*comic, *target)));
    }
    (deletes, creates)
}

pub struct LinkSynchronizer {
    relations: Arc<dyn RelationRepository>,
    links: Arc<dyn LinkRepository>,
    comics: Arc<dyn ComicRepository>,
    query_batch_size: usize,
    link_batch_size: usize,
}

impl LinkSynchronizer {
    pub fn new(
        relations: Arc<dyn RelationRepository>,
        links: Arc<dyn LinkRepository>,
        comics: Arc<dyn ComicRepository>,
        query_batch_size: usize,
        link_batch_size: usize,
    ) -> Self {
        Self {
            relations,
            links,
            comics,
            query_batch_size,
            link_batch_size,
        }
    }

    /// Reconcile every linked relation and the protagonists of `comics`
    ///
    /// A relation missing from a comic's link map leaves that association
    /// table untouched for the comic; an empty set clears it.
    #[instrument(skip_all, fields(comics = comics.len()))]
    pub async fn sync(
        &self,
        comics: &[(ComicId, &NormalizedComic)],
        cancel: &CancellationToken,
    ) -> Result<LinkReport> {
        let mut report = LinkReport::default();
        for relation in Relation::linked() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let targets: BTreeMap<ComicId, (&str, &BTreeSet<KeyTuple>)> = comics
                .iter()
                .filter_map(|(id, comic)| {
                    comic
                        .links
                        .get(&relation)
                        .map(|keys| (*id, (comic.path.as_str(), keys)))
                })
                .collect();
            if targets.is_empty() {
                continue;
            }
            report.add(self.sync_relation(relation, &targets, cancel).await?);
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        report.protagonists = self.sync_protagonists(comics).await?;
        Ok(report)
    }

    async fn sync_relation(
        &self,
        relation: Relation,
        targets: &BTreeMap<ComicId, (&str, &BTreeSet<KeyTuple>)>,
        cancel: &CancellationToken,
    ) -> Result<LinkReport> {
        let Some(link) = relation.descriptor().link else {
            return Ok(LinkReport::default());
        };
        let keys: BTreeSet<KeyTuple> = targets
            .values()
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect();
        let keys: Vec<KeyTuple> = keys.into_iter().collect();
        let ids = if keys.is_empty() {
            HashMap::new()
        } else {
            self.relations
                .find_ids(relation, &keys, self.query_batch_size)
                .await
                .map_err(|err| SyncError::query_batch(relation, err))?
        };

        let mut dropped = 0;
        let mut proposed: BTreeMap<ComicId, BTreeSet<i64>> = BTreeMap::new();
        for (comic, (path, keys)) in targets {
            let entry = proposed.entry(*comic).or_default();
            for key in keys.iter() {
                match ids.get(key) {
                    Some(id) => {
                        entry.insert(*id);
                    }
                    None => {
                        let err = LinkResolutionError {
                            relation: relation.to_string(),
                            comic: path.to_string(),
                            target: format!("{:?}", key),
                        };
                        warn!(error = %err, "Link dropped");
                        dropped += 1;
                    }
                }
            }
        }

        let mut report = self.reconcile(link, &proposed, cancel).await?;
        report.dropped = dropped;
        debug!(%relation, created = report.created, deleted = report.deleted, "Links synced");
        Ok(report)
    }

    /// Make `link` hold exactly `proposed` for each listed comic
    pub async fn reconcile(
        &self,
        link: LinkTable,
        proposed: &BTreeMap<ComicId, BTreeSet<i64>>,
        cancel: &CancellationToken,
    ) -> Result<LinkReport> {
        let comic_ids: Vec<ComicId> = proposed.keys().copied().collect();
        let existing = self
            .links
            .existing(link, &comic_ids, self.link_batch_size)
            .await?;
        let (deletes, creates) = diff_links(proposed, &existing);

        let mut report = LinkReport::default();
        for chunk in Batches::new(&deletes, self.link_batch_size) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            report.deleted += self.links.delete(link, chunk, self.link_batch_size).await?;
        }
        for chunk in Batches::new(&creates, self.link_batch_size) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            report.created += self.links.create(link, chunk, self.link_batch_size).await?;
        }
        Ok(report)
    }

    /// Link each comic to its ancestor folders
    pub async fn sync_folders(
        &self,
        folders: &BTreeMap<ComicId, BTreeSet<i64>>,
        cancel: &CancellationToken,
    ) -> Result<LinkReport> {
        if folders.is_empty() {
            return Ok(LinkReport::default());
        }
        let report = self.reconcile(FOLDER_LINK, folders, cancel).await?;
        debug!(created = report.created, deleted = report.deleted, "Folder links synced");
        Ok(report)
    }

    /// Resolve main character and team by name
    ///
    /// A main character name is looked up among characters first; if no
    /// character has that name and the comic names no main team, a team with
    /// that name is used as the main team.
    async fn sync_protagonists(
        &self,
        comics: &[(ComicId, &NormalizedComic)],
    ) -> Result<BTreeSet<ComicId>> {
        let character_names: BTreeSet<&str> = comics
            .iter()
            .filter_map(|(_, comic)| comic.main_character.as_deref())
            .collect();
        let team_names: BTreeSet<&str> = comics
            .iter()
            .flat_map(|(_, comic)| [comic.main_team.as_deref(), comic.main_character.as_deref()])
            .flatten()
            .collect();

        let characters = self.lookup(Relation::Character, &character_names).await?;
        let teams = self.lookup(Relation::Team, &team_names).await?;

        let mut assignments = Vec::with_capacity(comics.len());
        for (comic_id, comic) in comics {
            let mut main_character_id = None;
            let mut main_team_id = None;

            if let Some(name) = comic.main_character.as_deref() {
                main_character_id = characters.get(name).copied();
                if main_character_id.is_none() && comic.main_team.is_none() {
                    main_team_id = teams.get(name).copied();
                }
                if main_character_id.is_none() && main_team_id.is_none() {
                    self.warn_unresolved(Relation::Character, comic, name);
                }
            }
            if let Some(name) = comic.main_team.as_deref() {
                main_team_id = teams.get(name).copied();
                if main_team_id.is_none() {
                    self.warn_unresolved(Relation::Team, comic, name);
                }
            }

            assignments.push(Protagonists {
                comic_id: *comic_id,
                main_character_id,
                main_team_id,
            });
        }

        let changed = self.comics.set_protagonists(&assignments).await?;
        Ok(changed.into_iter().collect())
    }

    async fn lookup(&self, relation: Relation, names: &BTreeSet<&str>) -> Result<HashMap<String, i64>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<KeyTuple> = names.iter().map(|n| vec![KeyValue::text(*n)]).collect();
        let ids = self
            .relations
            .find_ids(relation, &keys, self.query_batch_size)
            .await
            .map_err(|err| SyncError::query_batch(relation, err))?;
        Ok(ids
            .into_iter()
            .filter_map(|(key, id)| {
                key.first()
                    .and_then(KeyValue::as_text)
                    .map(|name| (name.to_string(), id))
            })
            .collect())
    }

    fn warn_unresolved(&self, relation: Relation, comic: &NormalizedComic, name: &str) {
        let err = LinkResolutionError {
            relation: relation.to_string(),
            comic: comic.path.clone(),
            target: name.to_string(),
        };
        warn!(error = %err, "Protagonist not found");
    }
}
