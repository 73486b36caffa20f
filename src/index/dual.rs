use crate::error::{IndexError, Result};
use crate::events::PropertyChangedEventDisabler;
use crate::index::cancel::CancellationToken;
use crate::index::commit::CommitPolicyExecutor;
use crate::index::context::{ProviderContext, RebuildContext, UpdateContext};
use crate::index::crawler::{Crawler, SourceItem};
use crate::index::directory::{IndexDirectory, now_millis};
use crate::index::mode::RebuildModeTracker;
use crate::index::shard::Shard;
use crate::index::types::*;
use crate::index::writer::{ProcessedDocument, process_document};
use crate::store::{IndexStores, noop_post_action};
use crate::utils::progress;
use crate::utils::tokenize_query;
use lru::LruCache;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shard set and active mode; always read and switched together
pub(crate) struct IndexState {
    pub(crate) mode: Mode,
    pub(crate) shards: Vec<Shard>,
}

struct QueryCache {
    entries: LruCache<String, Vec<SearchHit>>,
    /// Bumped on every clear so a search that raced a switch or commit
    /// does not store results read from the old state
    epoch: u64,
}

/// A sharded index whose full rebuilds are written into a standby copy of
/// every shard and become visible in one switch.
///
/// Each shard has a primary and a secondary location. One [`Mode`] says
/// which of the two serves queries and incremental updates for the whole
/// index; full rebuilds write into the other. A rebuild that completes
/// flips the mode and persists it through the property store. A rebuild
/// that fails or is cancelled changes nothing that readers can see.
pub struct DualDirectoryIndex {
    name: String,
    folder: PathBuf,
    config: IndexConfig,
    stores: IndexStores,
    commit_executor: CommitPolicyExecutor,
    crawlers: Vec<Arc<dyn Crawler>>,
    state: RwLock<IndexState>,
    full_rebuild_lock: Mutex<()>,
    init_lock: Mutex<()>,
    initialized: AtomicBool,
    query_cache: Mutex<QueryCache>,
}

impl DualDirectoryIndex {
    pub fn new(name: impl Into<String>, folder: impl Into<PathBuf>, config: IndexConfig, stores: IndexStores) -> Self {
        let capacity = NonZeroUsize::new(config.query_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            folder: folder.into(),
            commit_executor: CommitPolicyExecutor::new(config.commit_policy),
            config,
            stores,
            crawlers: Vec::new(),
            state: RwLock::new(IndexState {
                mode: Mode::Primary,
                shards: Vec::new(),
            }),
            full_rebuild_lock: Mutex::new(()),
            init_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
            query_cache: Mutex::new(QueryCache {
                entries: LruCache::new(capacity),
                epoch: 0,
            }),
        }
    }

    /// Replace the template executor cloned into every context
    pub fn with_commit_executor(mut self, executor: CommitPolicyExecutor) -> Self {
        self.commit_executor = executor;
        self
    }

    /// Register a document source used by full rebuilds
    pub fn add_crawler(&mut self, crawler: Arc<dyn Crawler>) {
        self.crawlers.push(crawler);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn stores(&self) -> &IndexStores {
        &self.stores
    }

    /// Active mode. Meaningful once the index is initialized.
    pub fn mode(&self) -> Mode {
        self.state.read().mode
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read()
    }

    /// Initialize on first use; later and concurrent calls return at once
    pub fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let _init = self.init_lock.lock();
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        self.initialize_shards()?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Create the shard set, resolve the active mode and re-persist it.
    /// Runs with property-changed events suppressed.
    fn initialize_shards(&self) -> Result<()> {
        let _disabler = PropertyChangedEventDisabler::new(true);

        if self.config.shard_count == 0 {
            return Err(IndexError::Config(format!(
                "index '{}' needs at least one shard",
                self.name
            )));
        }

        let shards = (0..self.config.shard_count)
            .map(|id| Shard::create(id, &self.folder.join(format!("shard_{}", id))))
            .collect::<Result<Vec<_>>>()?;

        let persisted = self.get_property(IndexProperties::READ_UPDATE_DIRECTORY)?;
        let resolution = RebuildModeTracker::new(&self.name).resolve(&persisted, &shards)?;
        log::info!(
            "[Index={}] Resolved {} mode from {:?}",
            self.name,
            resolution.mode,
            resolution.source
        );

        {
            let mut state = self.state.write();
            state.mode = Mode::Primary;
            state.shards = shards;
        }

        self.apply_switch(|_| Ok(resolution.mode))?;
        Ok(())
    }

    /// Write lock on the shard set: switch and verify every shard, record
    /// the new mode, persist both properties.
    fn apply_switch(&self, target: impl FnOnce(Mode) -> Result<Mode>) -> Result<Mode> {
        let mut state = self.state.write();
        let mode = target(state.mode)?;

        for shard in state.shards.iter_mut() {
            shard.switch_directories(mode);
            let actual = shard.mode();
            if actual != mode {
                return Err(IndexError::ShardModeMismatch {
                    index: self.name.clone(),
                    shard: shard.id(),
                    expected: mode,
                    actual,
                });
            }
            log::debug!(
                "[Index={}, Shard={}] Serving from {}",
                self.name,
                shard,
                shard.read_update_directory().path().display()
            );
        }

        let previous = state.mode;
        state.mode = mode;

        {
            let _disabler = PropertyChangedEventDisabler::new(true);
            self.set_property(IndexProperties::READ_UPDATE_DIRECTORY, mode.as_str())?;
            self.set_property(IndexProperties::FULL_REBUILD_DIRECTORY, mode.opposite().as_str())?;
        }

        self.clear_query_cache();
        drop(state);

        if previous != mode {
            log::info!("[Index={}] Switched from {} to {} directories", self.name, previous, mode);
        }
        Ok(mode)
    }

    /// Make the currently inactive side active. Waits for a running full
    /// rebuild, so it must not be called while holding [`Self::full_rebuild_lock`].
    pub fn switch_directories(&self) -> Result<Mode> {
        self.ensure_initialized()?;
        let _rebuild = self.full_rebuild_lock.lock();
        self.apply_switch(|mode| Ok(mode.opposite()))
    }

    /// Make `mode` the active side (re-persisting it if it already is).
    /// Waits for a running full rebuild like [`Self::switch_directories`].
    pub fn switch_directories_to(&self, mode: Mode) -> Result<Mode> {
        self.ensure_initialized()?;
        let _rebuild = self.full_rebuild_lock.lock();
        self.apply_switch(|_| Ok(mode))
    }

    /// Held for the whole of a full rebuild and by manual switches
    pub fn full_rebuild_lock(&self) -> &Mutex<()> {
        &self.full_rebuild_lock
    }

    pub fn create_full_rebuild_context(&self) -> Result<RebuildContext<'_>> {
        self.ensure_initialized()?;
        let mut executor = self.commit_executor.clone();
        executor.bind(&self.name);
        RebuildContext::new(self, executor)
    }

    pub fn update_context(&self) -> Result<UpdateContext<'_>> {
        self.ensure_initialized()?;
        let mut executor = self.commit_executor.clone();
        executor.bind(&self.name);
        let shard_count = self.state.read().shards.len();
        Ok(UpdateContext::new(self, executor, shard_count))
    }

    /// Crawl every registered source into the inactive side, then switch
    pub fn rebuild(&self, options: &IndexingOptions, cancel: &CancellationToken) -> Result<RebuildSummary> {
        let _rebuild = self.full_rebuild_lock.lock();
        let mut context = self.create_full_rebuild_context()?;
        self.do_rebuild(&mut context, options, cancel)
    }

    /// Populate `context` and switch to its target only if that succeeds.
    /// Fails with [`IndexError::RebuildTargetActive`] when the target side
    /// started serving while the context was being populated.
    pub fn do_rebuild(
        &self,
        context: &mut RebuildContext<'_>,
        options: &IndexingOptions,
        cancel: &CancellationToken,
    ) -> Result<RebuildSummary> {
        let (documents, skipped) = match self.populate(context, options, cancel) {
            Ok(counts) => counts,
            Err(IndexError::Cancelled) => {
                log::warn!(
                    "[Index={}] Full rebuild cancelled, still serving {} directories",
                    self.name,
                    self.mode()
                );
                return Err(IndexError::Cancelled);
            }
            Err(e) => {
                log::error!("[Index={}] Full rebuild failed: {}", self.name, e);
                return Err(e);
            }
        };

        let target = context.target_mode();
        let active = self.apply_switch(|current| {
            if current == target {
                return Err(IndexError::RebuildTargetActive {
                    index: self.name.clone(),
                    target,
                });
            }
            Ok(target)
        })?;

        let stamped = {
            let _disabler = PropertyChangedEventDisabler::new(true);
            self.set_property(IndexProperties::LAST_FULL_REBUILD, &now_millis().to_string())
        };
        if let Err(e) = stamped {
            log::warn!(
                "[Index={}] Switched to {} but failed to record the rebuild time: {}",
                self.name,
                active,
                e
            );
        }

        Ok(RebuildSummary {
            documents,
            skipped,
            active,
        })
    }

    fn populate(
        &self,
        context: &mut RebuildContext<'_>,
        options: &IndexingOptions,
        cancel: &CancellationToken,
    ) -> Result<(usize, usize)> {
        let batch_size = options.batch_size.max(1);
        let mut documents = 0;
        let mut skipped = 0;

        for crawler in &self.crawlers {
            cancel.check()?;
            let items = crawler.discover()?;
            log::debug!(
                "[Index={}] {} items discovered by {}",
                self.name,
                items.len(),
                crawler.name()
            );

            let bar = progress::document_bar(items.len() as u64, crawler.name(), options.silent);

            for batch in items.chunks(batch_size) {
                cancel.check()?;

                let load = |item: &SourceItem| crawler.load(item).map(process_document);
                let processed: Vec<Option<ProcessedDocument>> = if options.parallel {
                    batch.par_iter().map(load).collect()
                } else {
                    batch.iter().map(load).collect()
                };

                for document in processed {
                    cancel.check()?;
                    match document {
                        Some(document) => {
                            context.add_processed(document)?;
                            documents += 1;
                        }
                        None => skipped += 1,
                    }
                    if let Some(bar) = &bar {
                        bar.inc(1);
                    }
                }
            }

            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
        }

        cancel.check()?;
        context.finish()?;
        Ok((documents, skipped))
    }

    /// Prepare a context for another attempt. A rebuild context drops what
    /// it wrote and reopens its writers; an update context discards its
    /// buffered changes.
    pub fn do_reset<'c, 'a: 'c>(&self, context: impl Into<ProviderContext<'c, 'a>>) -> Result<()> {
        match context.into() {
            ProviderContext::FullRebuild(context) => {
                context.reset()?;
                context.reinitialize_writers()
            }
            ProviderContext::Update(context) => {
                context.reset();
                Ok(())
            }
        }
    }

    pub fn get_property(&self, key: &str) -> Result<String> {
        match self.stores.extended_store() {
            Some(store) => store.get_with(key, &noop_post_action),
            None => self.stores.store().get(key),
        }
    }

    pub fn set_property(&self, key: &str, value: &str) -> Result<()> {
        match self.stores.extended_store() {
            Some(store) => store.set_with(key, value, &noop_post_action),
            None => self.stores.store().set(key, value),
        }
    }

    /// Documents matching every query term, best first
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.ensure_initialized()?;
        let terms = tokenize_query(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let key = format!("{}|{}", terms.join(" "), limit);
        let epoch = {
            let mut cache = self.query_cache.lock();
            if let Some(hits) = cache.entries.get(&key) {
                return Ok(hits.clone());
            }
            cache.epoch
        };

        let mut hits = Vec::new();
        {
            let state = self.state.read();
            for shard in &state.shards {
                hits.extend(shard.reader()?.search(&terms)?);
            }
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        if limit > 0 {
            hits.truncate(limit);
        }

        let mut cache = self.query_cache.lock();
        if cache.epoch == epoch {
            cache.entries.put(key, hits.clone());
        }
        Ok(hits)
    }

    pub(crate) fn clear_query_cache(&self) {
        let mut cache = self.query_cache.lock();
        cache.entries.clear();
        cache.epoch += 1;
    }

    /// Live documents on the active side
    pub fn document_count(&self) -> Result<usize> {
        self.ensure_initialized()?;
        let state = self.state.read();
        let mut count = 0;
        for shard in &state.shards {
            count += shard.reader()?.doc_count();
        }
        Ok(count)
    }

    /// Fetch one document from the active side
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.ensure_initialized()?;
        let state = self.state.read();
        for shard in &state.shards {
            if let Some(document) = shard.reader()?.get(id) {
                return Ok(Some(document.clone()));
            }
        }
        Ok(None)
    }

    pub fn shard_status(&self) -> Result<Vec<ShardStatus>> {
        self.ensure_initialized()?;
        let state = self.state.read();
        state
            .shards
            .iter()
            .map(|shard| {
                Ok(ShardStatus {
                    shard: shard.id(),
                    mode: shard.mode(),
                    primary_modified: committed_at(shard.directories().primary())?,
                    secondary_modified: committed_at(shard.directories().secondary())?,
                    live_documents: shard.reader()?.doc_count(),
                })
            })
            .collect()
    }
}

fn committed_at(directory: &IndexDirectory) -> Result<Option<i64>> {
    match directory.last_modified() {
        Ok(at) => Ok(Some(at)),
        Err(e) if e.is_no_segments() => Ok(None),
        Err(e) => Err(e),
    }
}

impl std::fmt::Debug for DualDirectoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualDirectoryIndex")
            .field("name", &self.name)
            .field("folder", &self.folder)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
