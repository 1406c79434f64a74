//! Work tree orchestration
//!
//! A [`WorkTree`] owns one replica's tree and its open buffer sessions, and
//! is the surface callers issue commands against. Every successful command
//! emits operations that are appended to the replica's log for shipping.
//!
//! [`SharedWorkTree`] wraps a work tree for use across await points; its
//! only asynchronous operation is [`SharedWorkTree::reset`], which rebases
//! the tree onto a new baseline while carrying over unsaved buffer edits.

use crate::buffer::{Point, RangeWithText};
use crate::config::WorkTreeConfig;
use crate::error::Error;
use crate::io::{BaselineId, IoProvider};
use crate::oplog::OperationLog;
use crate::time;
use crate::tree::{
    BaseEntry, Entry, FileId, FileType, Operation, Tree, ROOT_FILE_ID,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifies one open text-editing session. Never reused, including across
/// resets.
pub type BufferId = u64;

pub struct WorkTree {
    tree: Tree,
    lamport_clock: time::Lamport,
    buffers: HashMap<BufferId, FileId>,
    next_buffer_id: BufferId,
    operations: OperationLog,
    config: WorkTreeConfig,
    reset_seq: u64,
}

impl WorkTree {
    pub fn new(config: WorkTreeConfig) -> Result<Self, Error> {
        config.validate()?;
        info!(replica_id = config.replica_id, "creating work tree");
        Ok(Self {
            tree: Tree::new(config.replica_id),
            lamport_clock: time::Lamport::new(config.replica_id),
            buffers: HashMap::new(),
            next_buffer_id: 1,
            operations: OperationLog::new(),
            config,
            reset_seq: 0,
        })
    }

    pub fn root_file_id(&self) -> FileId {
        ROOT_FILE_ID
    }

    pub fn replica_id(&self) -> time::ReplicaId {
        self.config.replica_id
    }

    pub fn version(&self) -> time::Global {
        self.tree.version()
    }

    // ----- structural commands -----

    pub fn append_base_entries<I>(&mut self, entries: I) -> Result<Vec<Operation>, Error>
    where
        I: IntoIterator<Item = BaseEntry>,
    {
        let fixup_ops = self
            .tree
            .append_base_entries(entries, &mut self.lamport_clock)?;
        self.operations.extend(fixup_ops.clone());
        Ok(fixup_ops)
    }

    /// Merge remote operations, returning the fixup operations this merge
    /// emitted. Both the merged and the emitted operations land in the log.
    pub fn apply_ops<I>(&mut self, ops: I) -> Vec<Operation>
    where
        I: IntoIterator<Item = Operation>,
    {
        let version = self.tree.version();
        let fresh: Vec<Operation> = ops
            .into_iter()
            .filter(|op| !version.observed(op.local_timestamp()))
            .collect();
        let fixup_ops = self.tree.apply_ops(fresh.clone(), &mut self.lamport_clock);
        self.operations.extend(fresh);
        self.operations.extend(fixup_ops.clone());
        fixup_ops
    }

    pub fn new_text_file(
        &mut self,
        parent_id: FileId,
        name: &str,
    ) -> Result<(FileId, Operation), Error> {
        let (file_id, operation) =
            self.tree
                .create_file(parent_id, name, FileType::Text, &mut self.lamport_clock)?;
        self.operations.append(operation.clone());
        Ok((file_id, operation))
    }

    pub fn create_directory(
        &mut self,
        parent_id: FileId,
        name: &str,
    ) -> Result<(FileId, Operation), Error> {
        let (file_id, operation) = self.tree.create_file(
            parent_id,
            name,
            FileType::Directory,
            &mut self.lamport_clock,
        )?;
        self.operations.append(operation.clone());
        Ok((file_id, operation))
    }

    pub fn rename(
        &mut self,
        file_id: FileId,
        new_parent_id: FileId,
        new_name: &str,
    ) -> Result<Operation, Error> {
        let operation =
            self.tree
                .rename(file_id, new_parent_id, new_name, &mut self.lamport_clock)?;
        self.operations.append(operation.clone());
        Ok(operation)
    }

    pub fn remove(&mut self, file_id: FileId) -> Result<Operation, Error> {
        let operation = self.tree.remove(file_id, &mut self.lamport_clock)?;
        self.operations.append(operation.clone());
        Ok(operation)
    }

    // ----- queries -----

    pub fn file_id_for_path(&self, path: &str) -> Result<FileId, Error> {
        self.tree.file_id_for_path(path)
    }

    pub fn path_for_file_id(&self, file_id: FileId) -> Result<String, Error> {
        self.tree
            .path_for_file_id(file_id)
            .ok_or(Error::InvalidTarget(file_id))
    }

    /// Depth-first entry listing. `show_deleted` defaults to the configured
    /// value when not given.
    pub fn entries(
        &self,
        show_deleted: Option<bool>,
        descend_into: Option<&HashSet<FileId>>,
    ) -> Vec<Entry> {
        let show_deleted = show_deleted.unwrap_or(self.config.show_deleted);
        self.tree.entries(show_deleted, descend_into)
    }

    /// Operations a peer at `version` has not observed yet.
    pub fn ops_since(&self, version: &time::Global) -> Vec<Operation> {
        self.operations.ops_since(version)
    }

    // ----- buffers -----

    /// Open an editing session on `file_id`, seeding the buffer with
    /// `base_text`. Opening an already-open file returns the existing
    /// session; the two callers share one buffer.
    pub fn open_text_file(
        &mut self,
        file_id: FileId,
        base_text: &str,
    ) -> Result<BufferId, Error> {
        if let Some(buffer_id) = self.buffer_id_for_file(file_id) {
            return Ok(buffer_id);
        }
        self.tree.open_text_file(file_id, base_text)?;
        let buffer_id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(buffer_id, file_id);
        debug!(buffer_id, ?file_id, "opened text file");
        Ok(buffer_id)
    }

    pub fn text(&self, buffer_id: BufferId) -> Result<String, Error> {
        self.tree.text(self.buffer_file_id(buffer_id)?)
    }

    /// Replace `old_ranges` (char offsets in the current text) with
    /// `new_text` as one atomic multi-splice.
    pub fn edit(
        &mut self,
        buffer_id: BufferId,
        old_ranges: &[Range<usize>],
        new_text: &str,
    ) -> Result<Operation, Error> {
        let file_id = self.buffer_file_id(buffer_id)?;
        let operation = self
            .tree
            .edit(file_id, old_ranges, new_text, &mut self.lamport_clock)?;
        self.operations.append(operation.clone());
        Ok(operation)
    }

    /// Like [`WorkTree::edit`], with `(row, column)` point ranges.
    pub fn edit_2d(
        &mut self,
        buffer_id: BufferId,
        old_ranges: &[Range<Point>],
        new_text: &str,
    ) -> Result<Operation, Error> {
        let file_id = self.buffer_file_id(buffer_id)?;
        let operation = self
            .tree
            .edit_2d(file_id, old_ranges, new_text, &mut self.lamport_clock)?;
        self.operations.append(operation.clone());
        Ok(operation)
    }

    /// Spans of the buffer that changed since `version`, in current
    /// coordinates, with the text now occupying them.
    pub fn changes_since(
        &self,
        buffer_id: BufferId,
        version: &time::Global,
    ) -> Result<Vec<RangeWithText>, Error> {
        self.tree
            .changes_since(self.buffer_file_id(buffer_id)?, version)
    }

    pub fn buffer_file_id(&self, buffer_id: BufferId) -> Result<FileId, Error> {
        self.buffers
            .get(&buffer_id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("no buffer with id {}", buffer_id)))
    }

    fn buffer_id_for_file(&self, file_id: FileId) -> Option<BufferId> {
        self.buffers
            .iter()
            .find(|(_, id)| **id == file_id)
            .map(|(buffer_id, _)| *buffer_id)
    }

    /// Paths of open buffers that survive into `new_tree` and still need
    /// their baseline text fetched.
    fn paths_pending_fetch(
        &self,
        new_tree: &Tree,
        fetched: &HashMap<String, String>,
    ) -> Vec<String> {
        let mut paths = Vec::new();
        for file_id in self.buffers.values() {
            let Some(path) = self.tree.path_for_file_id(*file_id) else {
                continue;
            };
            if fetched.contains_key(&path) {
                continue;
            }
            if new_tree
                .file_id_for_path(&path)
                .ok()
                .and_then(|id| new_tree.file_type(id).ok())
                == Some(FileType::Text)
            {
                paths.push(path);
            }
        }
        paths.sort();
        paths.dedup();
        paths
    }
}

/// A work tree shareable across await points. All synchronous commands go
/// through [`SharedWorkTree::with`]; the lock is never held across an await.
#[derive(Clone)]
pub struct SharedWorkTree {
    inner: Arc<Mutex<WorkTree>>,
}

impl SharedWorkTree {
    pub fn new(config: WorkTreeConfig) -> Result<Self, Error> {
        Ok(Self {
            inner: Arc::new(Mutex::new(WorkTree::new(config)?)),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut WorkTree) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Rebase the tree onto the baseline identified by `new_baseline`,
    /// carrying unsaved buffer edits across. Returns the operations the new
    /// epoch emitted: baseline fixups plus one edit per carried buffer.
    ///
    /// A reset superseded by a newer reset discards its work and returns no
    /// operations. Staleness is checked after every await point.
    pub async fn reset(
        &self,
        io: Arc<dyn IoProvider>,
        new_baseline: BaselineId,
    ) -> Result<Vec<Operation>, Error> {
        let (reset_id, replica_id) = self.with(|work_tree| {
            work_tree.reset_seq += 1;
            (work_tree.reset_seq, work_tree.replica_id())
        });
        info!(reset_id, "starting reset");

        // Phase 1: build the new epoch's tree off to the side, streaming the
        // baseline listing.
        let mut new_tree = Tree::new(replica_id);
        let mut new_lamport_clock = self.with(|work_tree| work_tree.lamport_clock);
        let mut baseline_fixups = Vec::new();
        let mut entry_stream = io.base_entries(new_baseline);
        while let Some(batch) = entry_stream.next().await {
            if self.is_stale(reset_id) {
                debug!(reset_id, "reset superseded during baseline import");
                return Ok(Vec::new());
            }
            baseline_fixups
                .extend(new_tree.append_base_entries(batch?, &mut new_lamport_clock)?);
        }
        drop(entry_stream);

        // Phase 2: fetch baseline text for every surviving open buffer.
        // Buffers can be opened while we await, so iterate to a fixed point,
        // bounded to guard against a caller that keeps opening new paths.
        let max_passes = self.with(|work_tree| work_tree.config.max_reset_passes);
        let mut fetched: HashMap<String, String> = HashMap::new();
        for _ in 0..max_passes {
            let pending =
                self.with(|work_tree| work_tree.paths_pending_fetch(&new_tree, &fetched));
            if pending.is_empty() {
                break;
            }
            for path in pending {
                let text = io.base_text(new_baseline, &path).await?;
                if self.is_stale(reset_id) {
                    debug!(reset_id, "reset superseded during text fetch");
                    return Ok(Vec::new());
                }
                fetched.insert(path, text);
            }
        }

        // Phase 3: swap the epoch in, re-opening surviving buffers and
        // splicing their unsaved text over the fresh baseline text. Buffers
        // whose path vanished from the baseline are closed.
        self.with(move |work_tree| {
            if work_tree.reset_seq != reset_id {
                debug!(reset_id, "reset superseded before swap");
                return Ok(Vec::new());
            }

            let mut operations = baseline_fixups;
            let mut carried_buffers = HashMap::new();
            for (buffer_id, file_id) in &work_tree.buffers {
                let Some(path) = work_tree.tree.path_for_file_id(*file_id) else {
                    debug!(buffer_id = *buffer_id, "closing buffer: file removed");
                    continue;
                };
                let Ok(new_file_id) = new_tree.file_id_for_path(&path) else {
                    debug!(
                        buffer_id = *buffer_id,
                        %path,
                        "closing buffer: path absent from baseline"
                    );
                    continue;
                };
                let Some(base_text) = fetched.get(&path) else {
                    // Only reachable when the fixed-point loop hit its bound.
                    warn!(
                        buffer_id = *buffer_id,
                        %path,
                        "closing buffer: baseline text not fetched"
                    );
                    continue;
                };
                new_tree.open_text_file(new_file_id, base_text)?;
                // Only unsaved edits are carried; pristine buffers pick up
                // the new baseline text.
                if work_tree.tree.is_modified_file(*file_id) {
                    let old_text = work_tree.tree.text(*file_id)?;
                    if old_text != *base_text {
                        let base_len = base_text.chars().count();
                        operations.push(new_tree.edit(
                            new_file_id,
                            &[0..base_len],
                            &old_text,
                            &mut new_lamport_clock,
                        )?);
                    }
                }
                carried_buffers.insert(*buffer_id, new_file_id);
            }

            info!(
                reset_id,
                carried = carried_buffers.len(),
                operations = operations.len(),
                "reset complete"
            );
            work_tree.tree = new_tree;
            work_tree.buffers = carried_buffers;
            work_tree.lamport_clock = new_lamport_clock;
            work_tree.operations = OperationLog::new();
            work_tree.operations.extend(operations.clone());
            Ok(operations)
        })
    }

    fn is_stale(&self, reset_id: u64) -> bool {
        self.with(|work_tree| work_tree.reset_seq != reset_id)
    }
}
