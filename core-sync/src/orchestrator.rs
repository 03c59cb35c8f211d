//! # Pipeline Orchestrator
//!
//! Runs one import task through every phase, in order:
//!
//! 1. **Init**: load the library and start the job
//! 2. **Move**: rewrite moved folders, comics and covers in place
//! 3. **Extract**: read metadata from created, modified (and, when forced,
//!    every known) comic archive
//! 4. **Aggregate**: normalize metadata into proposals
//! 5. **Query missing**: split proposals into create/update/unchanged
//! 6. **Create FKs**: write relation rows, then the folder tree
//! 7. **Covers**: record custom covers and attach them to groups
//! 8. **Comics**: create or update comic rows that changed
//! 9. **Link**: reconcile association tables and protagonists
//! 10. **Delete stale**: remove deleted comics, folders and covers
//! 11. **Failed imports**: record failures, forget recovered paths
//! 12. **Search sync**: rewrite documents and fix up stale columns
//! 13. **Finish**: publish counts and change notifications
//!
//! The abort signal is checked at every phase transition and once per batch
//! inside long phases. There is no transaction across phases: whatever
//! committed before an abort or failure stays committed, and a rerun picks
//! up from the current disk and catalog state.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{ImportTask, PipelineOrchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! let orchestrator = PipelineOrchestrator::new(config, adapter, extractor, fs, clock, event_bus);
//!
//! let mut task = ImportTask::new(library_id);
//! task.files_created.insert("/lib/Saga/Saga 001.cbz".to_string());
//!
//! let job = orchestrator.run(&task, &CancellationToken::new()).await?;
//! println!("{} changes", job.counts.map(|c| c.total()).unwrap_or(0));
//! ```

use crate::error::{Result, RowPrepareError, SyncError};
use crate::failed_imports::{log_failure, FailedImportTracker};
use crate::job::{Counts, ImportJob, ImportPhase};
use crate::linker::LinkSynchronizer;
use crate::resolver::MissingRelationResolver;
use crate::search_index::SearchIndexSynchronizer;
use crate::status::{EventStatusReporter, StatusReporter};
use crate::task::ImportTask;
use crate::writer::BulkWriter;
use bridge_traits::database::DatabaseAdapter;
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use core_library::repositories::{
    ancestor_paths, ComicRepository, CoverRepository, FolderRepository, LibraryRepository,
    RelationRepository, SqliteComicRepository, SqliteCoverRepository,
    SqliteFailedImportRepository, SqliteFolderRepository, SqliteLibraryRepository,
    SqliteLinkRepository, SqliteRelationRepository, SqliteSearchRepository,
};
use core_library::{
    sort_name, Comic, ComicId, CoverGroup, CustomCover, Folder, KeyTuple, LibraryId, Relation,
    RelationKind,
};
use core_metadata::{
    ComicExtractor, ExtractionFailure, MetadataNormalizer, NormalizedComic, RawComicMetadata,
};
use core_runtime::config::ImporterConfig;
use core_runtime::events::{CoreEvent, EventBus, ImportEvent, ImportStatus, LibraryEvent};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Extraction progress is pushed to listeners every this many files
const PROGRESS_NOTIFY_EVERY: u64 = 100;

const GROUPS: [Relation; 4] = [
    Relation::Publisher,
    Relation::Imprint,
    Relation::Series,
    Relation::Volume,
];

const SIMPLE_FKS: [Relation; 6] = [
    Relation::AgeRating,
    Relation::Country,
    Relation::Language,
    Relation::OriginalFormat,
    Relation::ScanInfo,
    Relation::Tagger,
];

/// Ids of the rows comics point at, per relation
type References = HashMap<Relation, HashMap<KeyTuple, i64>>;

/// Everything one run carries from phase to phase
struct RunState {
    library_id: LibraryId,
    library_root: String,
    counts: Counts,
    comics: Vec<NormalizedComic>,
    failures: Vec<ExtractionFailure>,
    updated_ids: BTreeMap<Relation, Vec<i64>>,
    folder_ids: HashMap<String, i64>,
    /// Imported comics by path
    comic_ids: HashMap<String, ComicId>,
    /// Comics created or updated by the comic write
    written: BTreeSet<ComicId>,
    /// Moved comics whose folder links must follow them
    moved_comics: BTreeSet<String>,
    /// Destinations of moved folders
    moved_folders: BTreeSet<String>,
}

impl RunState {
    fn new(library_id: LibraryId, library_root: String) -> Self {
        Self {
            library_id,
            library_root,
            counts: Counts::default(),
            comics: Vec::new(),
            failures: Vec::new(),
            updated_ids: BTreeMap::new(),
            folder_ids: HashMap::new(),
            comic_ids: HashMap::new(),
            written: BTreeSet::new(),
            moved_comics: BTreeSet::new(),
            moved_folders: BTreeSet::new(),
        }
    }

    fn imported(&self) -> Vec<(ComicId, &NormalizedComic)> {
        self.comics
            .iter()
            .filter_map(|comic| self.comic_ids.get(&comic.path).map(|id| (*id, comic)))
            .collect()
    }

    /// Whether `path` lies strictly below the library root
    fn in_library(&self, path: &str) -> bool {
        let path = Path::new(path);
        path != Path::new(&self.library_root) && path.starts_with(&self.library_root)
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn parent_path(path: &str) -> Option<String> {
    Path::new(path)
        .parent()
        .map(|parent| parent.to_string_lossy().into_owned())
}

fn status_for(phase: ImportPhase) -> ImportStatus {
    ImportStatus::new(phase.code(), phase.title())
}

/// Comic row for a normalized archive
///
/// Fails when a group row or parent folder it needs was never written.
fn comic_record(
    library_id: LibraryId,
    comic: &NormalizedComic,
    references: &References,
    folder_ids: &HashMap<String, i64>,
) -> std::result::Result<Comic, RowPrepareError> {
    let group_id = |relation: Relation| -> std::result::Result<i64, RowPrepareError> {
        comic
            .groups
            .get(relation)
            .and_then(|key| references.get(&relation)?.get(key))
            .copied()
            .ok_or_else(|| {
                RowPrepareError::new("comics", &comic.path, format!("no {} row", relation))
            })
    };
    let simple_id = |relation: Relation| -> Option<i64> {
        comic
            .simple_fks
            .get(&relation)
            .and_then(|key| references.get(&relation)?.get(key))
            .copied()
    };
    let parent_folder_id = match comic.parent_folder() {
        Some(folder) => Some(folder_ids.get(folder).copied().ok_or_else(|| {
            RowPrepareError::new("comics", &comic.path, format!("no folder row for {}", folder))
        })?),
        None => None,
    };

    let scalars = &comic.scalars;
    Ok(Comic {
        library_id,
        path: comic.path.clone(),
        parent_folder_id,
        publisher_id: group_id(Relation::Publisher)?,
        imprint_id: group_id(Relation::Imprint)?,
        series_id: group_id(Relation::Series)?,
        volume_id: group_id(Relation::Volume)?,
        age_rating_id: simple_id(Relation::AgeRating),
        country_id: simple_id(Relation::Country),
        language_id: simple_id(Relation::Language),
        original_format_id: simple_id(Relation::OriginalFormat),
        scan_info_id: simple_id(Relation::ScanInfo),
        tagger_id: simple_id(Relation::Tagger),
        name: scalars.name.clone(),
        issue_number: scalars.issue_number,
        issue_suffix: scalars.issue_suffix.clone(),
        year: scalars.year,
        month: scalars.month,
        day: scalars.day,
        page_count: scalars.page_count,
        summary: scalars.summary.clone(),
        notes: scalars.notes.clone(),
        critical_rating: scalars.critical_rating,
        reading_direction: scalars.reading_direction,
        monochrome: scalars.monochrome,
        file_type: scalars.file_type.clone(),
        size: scalars.size,
        mtime: scalars.mtime,
        sort_name: scalars.sort_name.clone(),
    })
}

/// Drives import tasks through the pipeline
pub struct PipelineOrchestrator {
    config: ImporterConfig,
    extractor: Arc<dyn ComicExtractor>,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    libraries: Arc<dyn LibraryRepository>,
    relations: Arc<dyn RelationRepository>,
    comics: Arc<dyn ComicRepository>,
    folders: Arc<dyn FolderRepository>,
    covers: Arc<dyn CoverRepository>,
    resolver: MissingRelationResolver,
    writer: BulkWriter,
    linker: LinkSynchronizer,
    tracker: FailedImportTracker,
    search: SearchIndexSynchronizer,
}

impl PipelineOrchestrator {
    /// Create an orchestrator over one catalog database
    ///
    /// # Arguments
    ///
    /// * `config` - Batch sizes and limits
    /// * `adapter` - Catalog database
    /// * `extractor` - Reads archive metadata
    /// * `fs` - Filesystem presence and stat checks
    /// * `clock` - Source of row and job timestamps
    /// * `event_bus` - Receives import and library events
    pub fn new(
        config: ImporterConfig,
        adapter: Arc<dyn DatabaseAdapter>,
        extractor: Arc<dyn ComicExtractor>,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
    ) -> Self {
        let relations: Arc<dyn RelationRepository> =
            Arc::new(SqliteRelationRepository::new(adapter.clone()));
        let comics: Arc<dyn ComicRepository> =
            Arc::new(SqliteComicRepository::new(adapter.clone()));
        let folders: Arc<dyn FolderRepository> =
            Arc::new(SqliteFolderRepository::new(adapter.clone()));
        let covers: Arc<dyn CoverRepository> =
            Arc::new(SqliteCoverRepository::new(adapter.clone()));
        let links = Arc::new(SqliteLinkRepository::new(adapter.clone()));
        let failed = Arc::new(SqliteFailedImportRepository::new(adapter.clone()));
        let search = Arc::new(SqliteSearchRepository::new(adapter.clone()));
        let libraries = Arc::new(SqliteLibraryRepository::new(adapter));

        let resolver = MissingRelationResolver::new(relations.clone(), config.query_batch_size);
        let writer = BulkWriter::new(
            relations.clone(),
            covers.clone(),
            config.query_batch_size,
            config.write_batch_size,
        );
        let linker = LinkSynchronizer::new(
            relations.clone(),
            links.clone(),
            comics.clone(),
            config.query_batch_size,
            config.link_batch_size,
        );
        let tracker = FailedImportTracker::new(
            failed,
            comics.clone(),
            fs.clone(),
            config.failed_reason_max_len,
            config.write_batch_size,
        );
        let search = SearchIndexSynchronizer::new(
            search,
            links,
            config.link_batch_size,
            config.write_batch_size,
        );

        Self {
            config,
            extractor,
            fs,
            clock,
            event_bus,
            libraries,
            relations,
            comics,
            folders,
            covers,
            resolver,
            writer,
            linker,
            tracker,
            search,
        }
    }

    /// Run a task, publishing progress on the event bus
    ///
    /// # Returns
    ///
    /// The completed job with its counts.
    ///
    /// # Errors
    ///
    /// [`SyncError::Cancelled`] when aborted, or the error that stopped the
    /// run. Phases finished before the error stay committed either way.
    pub async fn run(&self, task: &ImportTask, cancel: &CancellationToken) -> Result<ImportJob> {
        let job = ImportJob::new(task.library_id, self.now_ms());
        let reporter = EventStatusReporter::new(
            self.event_bus.clone(),
            job.id.as_str(),
            task.library_id.0,
        );
        self.run_job(job, task, &reporter, cancel).await
    }

    /// Run a task, reporting progress to `reporter`
    pub async fn run_with_reporter(
        &self,
        task: &ImportTask,
        reporter: &dyn StatusReporter,
        cancel: &CancellationToken,
    ) -> Result<ImportJob> {
        let job = ImportJob::new(task.library_id, self.now_ms());
        self.run_job(job, task, reporter, cancel).await
    }

    #[instrument(skip_all, fields(job_id = %job.id, library_id = task.library_id.0))]
    async fn run_job(
        &self,
        job: ImportJob,
        task: &ImportTask,
        reporter: &dyn StatusReporter,
        cancel: &CancellationToken,
    ) -> Result<ImportJob> {
        let mut job = job.start(self.now_ms())?;
        if task.is_empty() {
            debug!("Nothing to import");
            return job.complete(Counts::default(), self.now_ms());
        }

        let job_id = job.id.as_str();
        let library_id = task.library_id.0;
        let status = status_for(ImportPhase::Init);
        self.emit(ImportEvent::Started {
            job_id: job_id.clone(),
            library_id,
            status: status.clone(),
        });
        reporter.start(&status);
        info!("Import started");

        match self.execute(&mut job, task, reporter, cancel).await {
            Ok(counts) => {
                let job = job.complete(counts, self.now_ms())?;
                let status = status_for(ImportPhase::Finish).with_total(counts.total());
                reporter.finish(&status);
                self.emit(ImportEvent::Completed {
                    job_id,
                    library_id,
                    status,
                    changes: counts.total(),
                    duration_ms: job.duration_ms().unwrap_or(0),
                });
                self.notify(task.library_id, &counts);
                info!(
                    changes = counts.total(),
                    comics_created = counts.comics_created,
                    comics_updated = counts.comics_updated,
                    "Import completed"
                );
                Ok(job)
            }
            Err(SyncError::Cancelled) => {
                let phase = job.phase;
                job.cancel(self.now_ms())?;
                warn!(%phase, "Import cancelled");
                self.emit(ImportEvent::Cancelled {
                    job_id,
                    library_id,
                    status: status_for(phase),
                });
                Err(SyncError::Cancelled)
            }
            Err(err) => {
                let phase = job.phase;
                let message = err.to_string();
                job.fail(message.clone(), self.now_ms())?;
                error!(%phase, "Import failed: {}", message);
                self.emit(ImportEvent::Failed {
                    job_id,
                    library_id,
                    status: status_for(phase),
                    message,
                });
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        job: &mut ImportJob,
        task: &ImportTask,
        reporter: &dyn StatusReporter,
        cancel: &CancellationToken,
    ) -> Result<Counts> {
        let library = self.libraries.get(task.library_id).await?;
        let mut state = RunState::new(library.id, library.path);

        self.enter(job, ImportPhase::Move, reporter, cancel)?;
        self.apply_moves(task, &mut state).await?;

        self.enter(job, ImportPhase::Extract, reporter, cancel)?;
        let extracted = self.extract(task, &mut state, reporter, cancel).await?;

        self.enter(job, ImportPhase::Aggregate, reporter, cancel)?;
        let mut normalizer = MetadataNormalizer::new(state.library_root.clone());
        state.comics = extracted
            .iter()
            .map(|(path, raw)| normalizer.add(path, raw))
            .collect();
        let proposals = normalizer.finish();
        debug!(comics = state.comics.len(), relations = proposals.len(), "Metadata aggregated");

        self.enter(job, ImportPhase::QueryMissing, reporter, cancel)?;
        let buckets = self.resolver.resolve_all(&proposals, cancel).await?;
        drop(proposals);

        self.enter(job, ImportPhase::CreateFks, reporter, cancel)?;
        let report = self.writer.write(&buckets, self.now(), cancel).await?;
        state.counts.tags_created += report.created;
        state.counts.tags_updated += report.updated;
        state.updated_ids = report.updated_ids;
        drop(buckets);
        self.create_folders(task, &mut state).await?;

        self.enter(job, ImportPhase::Covers, reporter, cancel)?;
        self.sync_covers(task, &mut state).await?;

        self.enter(job, ImportPhase::Comics, reporter, cancel)?;
        self.write_comics(&mut state).await?;

        self.enter(job, ImportPhase::Link, reporter, cancel)?;
        self.link(&mut state, cancel).await?;

        self.enter(job, ImportPhase::DeleteStale, reporter, cancel)?;
        self.delete_stale(task, &mut state).await?;

        self.enter(job, ImportPhase::FailedImports, reporter, cancel)?;
        let failed = self
            .tracker
            .reconcile(state.library_id, &state.failures, self.now())
            .await?;
        state.counts.failed_imports_created += failed.created;
        state.counts.failed_imports_updated += failed.updated;
        state.counts.failed_imports_recovered += failed.recovered;

        self.enter(job, ImportPhase::SearchSync, reporter, cancel)?;
        self.sync_search(&state, cancel).await?;

        Ok(state.counts)
    }

    /// Check the abort signal and move the job to `phase`
    fn enter(
        &self,
        job: &mut ImportJob,
        phase: ImportPhase,
        reporter: &dyn StatusReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        job.advance(phase)?;
        debug!(%phase, "Entering phase");
        reporter.update(&status_for(phase), true);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Move
    // ------------------------------------------------------------------

    async fn apply_moves(&self, task: &ImportTask, state: &mut RunState) -> Result<()> {
        let now = self.now();

        for (from, to) in &task.folders_moved {
            let parents = ancestor_paths(&state.library_root, to);
            self.ensure_folders(parents, state).await?;
            if self.folders.move_folder(from, to, now).await? > 0 {
                state.counts.folders_moved += 1;
                state.moved_folders.insert(to.clone());
            }
        }

        if !task.files_moved.is_empty() {
            let destinations: BTreeSet<String> = task
                .files_moved
                .values()
                .flat_map(|to| ancestor_paths(&state.library_root, to))
                .collect();
            self.ensure_folders(destinations, state).await?;

            let moves: Vec<(String, String)> = task
                .files_moved
                .iter()
                .map(|(from, to)| (from.clone(), to.clone()))
                .collect();
            state.counts.comics_moved += self.comics.move_paths(&moves, now).await?;
            state.moved_comics.extend(task.files_moved.values().cloned());
        }

        if !task.covers_moved.is_empty() {
            let moves: Vec<(String, String)> = task
                .covers_moved
                .iter()
                .map(|(from, to)| (from.clone(), to.clone()))
                .collect();
            state.counts.covers_moved += self.covers.move_paths(&moves, now).await?;
        }

        if state.counts.folders_moved + state.counts.comics_moved + state.counts.covers_moved > 0 {
            info!(
                folders = state.counts.folders_moved,
                comics = state.counts.comics_moved,
                covers = state.counts.covers_moved,
                "Moves applied"
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Extract
    // ------------------------------------------------------------------

    #[instrument(skip_all)]
    async fn extract(
        &self,
        task: &ImportTask,
        state: &mut RunState,
        reporter: &dyn StatusReporter,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, RawComicMetadata)>> {
        let mut paths = task.paths_to_extract();
        if task.force_import_metadata {
            let known = self.comics.paths_in_library(state.library_id).await?;
            paths.extend(
                known
                    .into_iter()
                    .filter(|path| !task.files_deleted.contains(path)),
            );
        }

        let total = paths.len() as u64;
        let batch = self.config.write_batch_size.max(1);
        let mut extracted = Vec::with_capacity(paths.len());
        for (index, path) in paths.into_iter().enumerate() {
            if index % batch == 0 && cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match self.extractor.extract(Path::new(&path)).await {
                Ok(raw) => extracted.push((path, raw)),
                Err(failure) => {
                    let failure = ExtractionFailure { path, ..failure };
                    log_failure(&failure);
                    state.failures.push(failure);
                }
            }
            let done = index as u64 + 1;
            reporter.update(
                &status_for(ImportPhase::Extract).with_progress(done, total),
                done == total || done % PROGRESS_NOTIFY_EVERY == 0,
            );
        }

        info!(
            extracted = extracted.len(),
            failed = state.failures.len(),
            "Archives read"
        );
        Ok(extracted)
    }

    // ------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------

    async fn create_folders(&self, task: &ImportTask, state: &mut RunState) -> Result<()> {
        let mut paths: BTreeSet<String> = state
            .comics
            .iter()
            .flat_map(|comic| comic.folders.iter().cloned())
            .collect();
        for folder in &task.folders_created {
            if state.in_library(folder) && !task.folders_deleted.contains(folder) {
                paths.extend(ancestor_paths(&state.library_root, folder));
                paths.insert(folder.clone());
            }
        }
        self.ensure_folders(paths, state).await
    }

    /// Make sure every folder in `paths` has a row, parents first
    ///
    /// Ids of all of them end up in `state.folder_ids`. Callers pass whole
    /// ancestor chains, so each folder's parent is either the library root or
    /// one level up in the same set.
    async fn ensure_folders(
        &self,
        paths: impl IntoIterator<Item = String>,
        state: &mut RunState,
    ) -> Result<()> {
        let mut by_depth: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for path in paths {
            if state.folder_ids.contains_key(&path) || !state.in_library(&path) {
                continue;
            }
            let depth = Path::new(&path).components().count();
            by_depth.entry(depth).or_default().push(path);
        }

        let batch = self.config.query_batch_size;
        for (_, mut level) in by_depth {
            level.sort();
            level.dedup();
            let existing = self.folders.find_by_paths(&level, batch).await?;
            for (path, stored) in &existing {
                state.folder_ids.insert(path.clone(), stored.id);
            }

            let missing: Vec<Folder> = level
                .iter()
                .filter(|path| !existing.contains_key(*path))
                .map(|path| {
                    let name = file_name(path);
                    Folder {
                        library_id: state.library_id,
                        path: path.clone(),
                        sort_name: sort_name(&name),
                        name,
                        parent_folder_id: parent_path(path)
                            .and_then(|parent| state.folder_ids.get(&parent).copied()),
                    }
                })
                .collect();
            if missing.is_empty() {
                continue;
            }

            self.folders
                .upsert(&missing, self.now(), self.config.write_batch_size)
                .await?;
            state.counts.folders_created += missing.len() as u64;
            let paths: Vec<String> = missing.into_iter().map(|folder| folder.path).collect();
            for (path, stored) in self.folders.find_by_paths(&paths, batch).await? {
                state.folder_ids.insert(path, stored.id);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Covers
    // ------------------------------------------------------------------

    async fn sync_covers(&self, task: &ImportTask, state: &mut RunState) -> Result<()> {
        if !task.has_cover_changes() {
            return Ok(());
        }

        let paths: Vec<String> = task
            .covers_created
            .iter()
            .chain(task.covers_modified.iter())
            .filter(|path| !task.covers_deleted.contains(*path))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if !paths.is_empty() {
            let known = self
                .covers
                .ids_by_paths(&paths, self.config.query_batch_size)
                .await?;
            let mut records = Vec::with_capacity(paths.len());
            for path in paths {
                let Some((group, sort)) = CoverGroup::classify(&path) else {
                    debug!(path = %path, "Not a cover location");
                    continue;
                };
                let stat = match self.fs.metadata(Path::new(&path)).await {
                    Ok(stat) => stat,
                    Err(err) => {
                        warn!(path = %path, error = %err, "Cover not readable");
                        continue;
                    }
                };
                if known.contains_key(&path) {
                    state.counts.covers_updated += 1;
                } else {
                    state.counts.covers_created += 1;
                }
                records.push(CustomCover {
                    library_id: state.library_id,
                    path,
                    group,
                    sort_name: sort,
                    size: stat.size as i64,
                    mtime: stat.modified_at,
                });
            }
            if !records.is_empty() {
                self.covers
                    .upsert(&records, self.now(), self.config.write_batch_size)
                    .await?;
            }
        }

        self.link_covers().await
    }

    async fn link_covers(&self) -> Result<()> {
        let now = self.now();
        let mut linked = 0;
        for group in CoverGroup::all() {
            linked += self.covers.link_groups(group, now).await?;
        }
        debug!(linked, "Group covers linked");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Comics
    // ------------------------------------------------------------------

    /// Ids of every group and named-leaf row the run's comics point at
    async fn comic_references(&self, comics: &[NormalizedComic]) -> Result<References> {
        let mut references = References::new();
        for relation in GROUPS.into_iter().chain(SIMPLE_FKS) {
            let keys: BTreeSet<&KeyTuple> = comics
                .iter()
                .filter_map(|comic| match relation.kind() {
                    RelationKind::Group => comic.groups.get(relation),
                    _ => comic.simple_fks.get(&relation),
                })
                .collect();
            if keys.is_empty() {
                continue;
            }
            let keys: Vec<KeyTuple> = keys.into_iter().cloned().collect();
            let ids = self
                .relations
                .find_ids(relation, &keys, self.config.query_batch_size)
                .await
                .map_err(|err| SyncError::query_batch(relation, err))?;
            references.insert(relation, ids);
        }
        Ok(references)
    }

    #[instrument(skip_all, fields(comics = state.comics.len()))]
    async fn write_comics(&self, state: &mut RunState) -> Result<()> {
        if state.comics.is_empty() {
            return Ok(());
        }
        let batch = self.config.query_batch_size;
        let references = self.comic_references(&state.comics).await?;
        let paths: Vec<String> = state.comics.iter().map(|c| c.path.clone()).collect();
        let stored = self.comics.find_by_paths(&paths, batch).await?;

        let mut writes = Vec::new();
        let mut importable = Vec::new();
        for comic in &state.comics {
            let record =
                match comic_record(state.library_id, comic, &references, &state.folder_ids) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(error = %err, "Comic skipped");
                        continue;
                    }
                };
            if let Err(reason) = record.validate() {
                let err = RowPrepareError::new("comics", &comic.path, reason);
                warn!(error = %err, "Comic skipped");
                continue;
            }
            importable.push(comic.path.clone());
            match stored.get(&comic.path) {
                Some(existing) if existing.comic == record => {}
                Some(_) => {
                    state.counts.comics_updated += 1;
                    writes.push(record);
                }
                None => {
                    state.counts.comics_created += 1;
                    writes.push(record);
                }
            }
        }

        if !writes.is_empty() {
            self.comics
                .upsert(&writes, self.now(), self.config.write_batch_size)
                .await?;
        }
        state.comic_ids = self.comics.ids_by_paths(&importable, batch).await?;
        state.written = writes
            .iter()
            .filter_map(|record| state.comic_ids.get(&record.path).copied())
            .collect();
        info!(
            created = state.counts.comics_created,
            updated = state.counts.comics_updated,
            unchanged = importable.len() - writes.len(),
            "Comics written"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Link
    // ------------------------------------------------------------------

    async fn link(&self, state: &mut RunState, cancel: &CancellationToken) -> Result<()> {
        let report = self.linker.sync(&state.imported(), cancel).await?;
        state.counts.links_created += report.created;
        state.counts.links_deleted += report.deleted;
        // protagonists on a comic written this run are part of that write
        let protagonist_only = report
            .protagonists
            .iter()
            .filter(|id| !state.written.contains(id))
            .count();
        state.counts.comics_updated += protagonist_only as u64;

        let relinked = self.relinked_comics(state).await?;
        let chains: BTreeSet<String> = relinked
            .keys()
            .flat_map(|path| ancestor_paths(&state.library_root, path))
            .collect();
        self.ensure_folders(chains, state).await?;

        let mut folders: BTreeMap<ComicId, BTreeSet<i64>> = BTreeMap::new();
        for (id, comic) in state.imported() {
            folders.insert(id, self.folder_chain(state, &comic.folders));
        }
        for (path, id) in &relinked {
            let chain = ancestor_paths(&state.library_root, path);
            folders.insert(*id, self.folder_chain(state, &chain));
        }

        let report = self.linker.sync_folders(&folders, cancel).await?;
        state.counts.links_created += report.created;
        state.counts.links_deleted += report.deleted;
        Ok(())
    }

    fn folder_chain(&self, state: &RunState, chain: &[String]) -> BTreeSet<i64> {
        chain
            .iter()
            .filter_map(|path| state.folder_ids.get(path).copied())
            .collect()
    }

    /// Moved comics not re-imported in this run, and comics inside moved
    /// folders
    async fn relinked_comics(&self, state: &RunState) -> Result<HashMap<String, ComicId>> {
        let mut paths: BTreeSet<String> = state.moved_comics.clone();
        if !state.moved_folders.is_empty() {
            let prefixes: Vec<String> = state
                .moved_folders
                .iter()
                .map(|folder| format!("{}/", folder.trim_end_matches('/')))
                .collect();
            let known = self.comics.paths_in_library(state.library_id).await?;
            paths.extend(
                known
                    .into_iter()
                    .filter(|path| prefixes.iter().any(|prefix| path.starts_with(prefix))),
            );
        }
        paths.retain(|path| !state.comic_ids.contains_key(path));
        if paths.is_empty() {
            return Ok(HashMap::new());
        }
        let paths: Vec<String> = paths.into_iter().collect();
        Ok(self
            .comics
            .ids_by_paths(&paths, self.config.query_batch_size)
            .await?)
    }

    // ------------------------------------------------------------------
    // Delete stale
    // ------------------------------------------------------------------

    async fn delete_stale(&self, task: &ImportTask, state: &mut RunState) -> Result<()> {
        let batch = self.config.write_batch_size;

        if !task.files_deleted.is_empty() {
            let paths: Vec<String> = task.files_deleted.iter().cloned().collect();
            state.counts.comics_deleted += self.comics.delete_by_paths(&paths, batch).await?;
        }
        if !task.folders_deleted.is_empty() {
            let paths: Vec<String> = task.folders_deleted.iter().cloned().collect();
            state.counts.folders_deleted += self.folders.delete_by_paths(&paths, batch).await?;
        }
        if !task.covers_deleted.is_empty() {
            let paths: Vec<String> = task.covers_deleted.iter().cloned().collect();
            let deleted = self.covers.delete_by_paths(&paths, batch).await?;
            state.counts.covers_deleted += deleted;
            if deleted > 0 {
                // another cover may now match the uncovered groups
                self.link_covers().await?;
            }
        }

        let counts = &state.counts;
        if counts.comics_deleted + counts.folders_deleted + counts.covers_deleted > 0 {
            info!(
                comics = counts.comics_deleted,
                folders = counts.folders_deleted,
                covers = counts.covers_deleted,
                "Stale rows deleted"
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    async fn sync_search(&self, state: &RunState, cancel: &CancellationToken) -> Result<()> {
        let imported = state.imported();
        let now = self.now();
        let written = self.search.sync_documents(&imported, now).await?;
        let inline: BTreeSet<ComicId> = imported.iter().map(|(id, _)| *id).collect();
        let fixed = self
            .search
            .fix_up(&state.updated_ids, &inline, now, cancel)
            .await?;
        debug!(written, fixed, "Search index synced");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Finish
    // ------------------------------------------------------------------

    fn notify(&self, library_id: LibraryId, counts: &Counts) {
        let library_id = library_id.0;
        if counts.total() > 0 {
            self.emit_library(LibraryEvent::LibraryChanged { library_id });
        }
        if counts.comic_affecting() > 0 {
            self.emit_library(LibraryEvent::SearchIndexUpdateRequested { library_id });
        }
        if counts.failed_imports_changed() {
            self.emit_library(LibraryEvent::FailedImportsChanged { library_id });
        }
    }

    fn emit(&self, event: ImportEvent) {
        self.event_bus.emit(CoreEvent::Import(event)).ok();
    }

    fn emit_library(&self, event: LibraryEvent) {
        self.event_bus.emit(CoreEvent::Library(event)).ok();
    }

    /// Row timestamp, unix seconds
    fn now(&self) -> i64 {
        self.clock.unix_timestamp()
    }

    /// Job timestamp, unix milliseconds
    fn now_ms(&self) -> i64 {
        self.clock.unix_millis()
    }
}
