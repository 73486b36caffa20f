//! Units of write work against a [`DualDirectoryIndex`].
//!
//! An [`UpdateContext`] applies incremental changes to whichever side is
//! active when it commits. A [`RebuildContext`] writes a complete new copy
//! of the index into the inactive side of every shard.

use crate::error::{IndexError, Result};
use crate::index::commit::CommitPolicyExecutor;
use crate::index::dual::DualDirectoryIndex;
use crate::index::shard::shard_for;
use crate::index::types::{Document, Mode};
use crate::index::writer::{ProcessedDocument, SegmentWriter, process_document};

enum PendingOp {
    Upsert(ProcessedDocument),
    Delete(String),
}

/// Incremental changes to the serving side.
///
/// Operations are buffered per shard and written when the commit policy
/// asks for it or on [`commit`](Self::commit). Dropping the context
/// discards anything not yet committed.
pub struct UpdateContext<'a> {
    index: &'a DualDirectoryIndex,
    executor: CommitPolicyExecutor,
    pending: Vec<Vec<PendingOp>>,
}

impl<'a> UpdateContext<'a> {
    pub(crate) fn new(index: &'a DualDirectoryIndex, executor: CommitPolicyExecutor, shard_count: usize) -> Self {
        Self {
            index,
            executor,
            pending: (0..shard_count).map(|_| Vec::new()).collect(),
        }
    }

    pub fn index(&self) -> &DualDirectoryIndex {
        self.index
    }

    pub fn add_document(&mut self, document: Document) -> Result<()> {
        self.push(PendingOp::Upsert(process_document(document)))
    }

    /// Same as [`add_document`](Self::add_document): the newest copy of an id wins
    pub fn update_document(&mut self, document: Document) -> Result<()> {
        self.add_document(document)
    }

    pub fn delete_document(&mut self, id: &str) -> Result<()> {
        self.push(PendingOp::Delete(id.to_string()))
    }

    /// Buffered operations not yet committed
    pub fn pending(&self) -> usize {
        self.pending.iter().map(Vec::len).sum()
    }

    fn push(&mut self, op: PendingOp) -> Result<()> {
        if self.pending.is_empty() {
            return Err(IndexError::NotInitialized(self.index.name().to_string()));
        }
        let id = match &op {
            PendingOp::Upsert(processed) => processed.document.id.as_str(),
            PendingOp::Delete(id) => id.as_str(),
        };
        let shard = shard_for(id, self.pending.len());
        self.pending[shard].push(op);

        if self.executor.record(1) {
            self.commit()?;
        }
        Ok(())
    }

    /// Write buffered operations to the active side of each shard
    pub fn commit(&mut self) -> Result<()> {
        if self.pending() == 0 {
            return Ok(());
        }

        let state = self.index.state();
        for (shard, ops) in state.shards.iter().zip(self.pending.iter_mut()) {
            if ops.is_empty() {
                continue;
            }

            let _write = shard.write_lock().lock();
            let mut writer = SegmentWriter::open(shard.read_update_directory().clone())?;
            for op in ops.drain(..) {
                match op {
                    PendingOp::Upsert(processed) => writer.add(processed),
                    PendingOp::Delete(id) => writer.delete(&id),
                }
            }
            writer.commit()?;
            shard.invalidate_reader();

            log::debug!(
                "[Index={}, Shard={}] Committed updates to {} directory",
                self.index.name(),
                shard,
                state.mode
            );
        }
        drop(state);

        self.index.clear_query_cache();
        self.executor.committed();
        Ok(())
    }

    /// Discard buffered changes
    pub fn reset(&mut self) {
        for ops in &mut self.pending {
            ops.clear();
        }
        self.executor.reset();
    }
}

/// A full rebuild in progress.
///
/// Holds one writer per shard, each over that shard's full-rebuild
/// directory as it was when the writers were (re)initialized.
pub struct RebuildContext<'a> {
    index: &'a DualDirectoryIndex,
    executor: CommitPolicyExecutor,
    target: Mode,
    writers: Vec<SegmentWriter>,
    documents: usize,
}

impl<'a> RebuildContext<'a> {
    pub(crate) fn new(index: &'a DualDirectoryIndex, executor: CommitPolicyExecutor) -> Result<Self> {
        let mut context = Self {
            index,
            executor,
            target: Mode::Secondary,
            writers: Vec::new(),
            documents: 0,
        };
        context.initialize_writers()?;
        Ok(context)
    }

    fn initialize_writers(&mut self) -> Result<()> {
        let state = self.index.state();
        self.target = state.mode.opposite();
        self.writers = state
            .shards
            .iter()
            .map(|shard| SegmentWriter::create(shard.full_rebuild_directory().clone()))
            .collect::<Result<_>>()?;

        log::debug!(
            "[Index={}] Full rebuild writing to {} directories",
            self.index.name(),
            self.target
        );
        Ok(())
    }

    pub fn index(&self) -> &DualDirectoryIndex {
        self.index
    }

    /// Side that becomes active when this rebuild succeeds
    pub fn target_mode(&self) -> Mode {
        self.target
    }

    pub fn executor(&self) -> &CommitPolicyExecutor {
        &self.executor
    }

    pub fn documents_added(&self) -> usize {
        self.documents
    }

    pub fn has_writers(&self) -> bool {
        !self.writers.is_empty()
    }

    pub fn add_document(&mut self, document: Document) -> Result<()> {
        self.add_processed(process_document(document))
    }

    /// Route an already tokenized document to its shard's writer
    pub fn add_processed(&mut self, processed: ProcessedDocument) -> Result<()> {
        if self.writers.is_empty() {
            return Err(IndexError::NotInitialized(self.index.name().to_string()));
        }
        let shard = shard_for(&processed.document.id, self.writers.len());
        self.writers[shard].add(processed);
        self.documents += 1;

        if self.executor.record(1) {
            self.commit()?;
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        for writer in &mut self.writers {
            writer.commit()?;
        }
        self.executor.committed();
        Ok(())
    }

    /// Final commit: every target directory gets a fresh commit point,
    /// including shards that received no documents.
    pub(crate) fn finish(&mut self) -> Result<()> {
        if self.writers.is_empty() {
            return Err(IndexError::NotInitialized(self.index.name().to_string()));
        }
        for writer in &mut self.writers {
            writer.commit_point()?;
        }
        self.executor.committed();
        Ok(())
    }

    /// Drop the writers and everything they wrote into the target directories
    pub fn reset(&mut self) -> Result<()> {
        for writer in self.writers.drain(..) {
            let directory = writer.directory().clone();
            drop(writer);
            directory.clear()?;
        }
        self.documents = 0;
        self.executor.reset();
        Ok(())
    }

    /// Open fresh writers over each shard's current full-rebuild directory
    pub fn reinitialize_writers(&mut self) -> Result<()> {
        self.initialize_writers()
    }
}

/// Either kind of context, for [`DualDirectoryIndex::do_reset`]
pub enum ProviderContext<'c, 'a> {
    Update(&'c mut UpdateContext<'a>),
    FullRebuild(&'c mut RebuildContext<'a>),
}

impl<'c, 'a> From<&'c mut UpdateContext<'a>> for ProviderContext<'c, 'a> {
    fn from(context: &'c mut UpdateContext<'a>) -> Self {
        ProviderContext::Update(context)
    }
}

impl<'c, 'a> From<&'c mut RebuildContext<'a>> for ProviderContext<'c, 'a> {
    fn from(context: &'c mut RebuildContext<'a>) -> Self {
        ProviderContext::FullRebuild(context)
    }
}
