//! Tree CRDT
//!
//! Maintains the hierarchical namespace under concurrent structural edits.
//! State is held in three last-writer-wins register families: per-file
//! metadata (immutable once created), parent refs (the full timestamped
//! history of where a file has lived, newest first), and child refs (the
//! placements under each `(parent, name)` slot). Arbitration is by Lamport
//! timestamp; merge-time conflicts are repaired by deterministic fixup
//! operations rather than surfaced as errors.

pub mod baseline;
pub mod cursor;

pub use baseline::BaseEntry;
pub use cursor::Entry;

use crate::buffer::{self, Buffer, Point, RangeWithText};
use crate::error::Error;
use crate::time;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Range;
use tracing::{debug, trace};

/// The tree root. Identical on every replica.
pub const ROOT_FILE_ID: FileId = FileId::Base(0);

/// Globally unique, rename-stable identity of a tree node.
///
/// `Base` ids are assigned densely, in depth-first order, while importing a
/// baseline snapshot; `New` ids carry the `(replica, seq)` pair of the
/// creating operation. Ids are never reused.
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub enum FileId {
    Base(u64),
    New(time::Local),
}

impl FileId {
    pub fn is_base(&self) -> bool {
        matches!(self, FileId::Base(_))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FileType {
    Directory,
    Text,
}

/// Per-entry status relative to the current baseline epoch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FileStatus {
    New,
    Renamed,
    Removed,
    Modified,
    RenamedAndModified,
    Unchanged,
}

/// One replicated structural or textual mutation.
///
/// Operations are immutable once emitted, idempotent under re-application,
/// and commutative with any causally independent operation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    InsertMetadata {
        file_id: FileId,
        file_type: FileType,
        parent: Option<(FileId, String)>,
        local_timestamp: time::Local,
        lamport_timestamp: time::Lamport,
    },
    UpdateParent {
        child_id: FileId,
        new_parent: Option<(FileId, String)>,
        local_timestamp: time::Local,
        lamport_timestamp: time::Lamport,
    },
    EditBuffer {
        file_id: FileId,
        operations: Vec<buffer::Operation>,
        local_timestamp: time::Local,
        lamport_timestamp: time::Lamport,
    },
}

impl Operation {
    pub fn local_timestamp(&self) -> time::Local {
        match self {
            Operation::InsertMetadata { local_timestamp, .. } => *local_timestamp,
            Operation::UpdateParent { local_timestamp, .. } => *local_timestamp,
            Operation::EditBuffer { local_timestamp, .. } => *local_timestamp,
        }
    }

    pub fn lamport_timestamp(&self) -> time::Lamport {
        match self {
            Operation::InsertMetadata { lamport_timestamp, .. } => *lamport_timestamp,
            Operation::UpdateParent { lamport_timestamp, .. } => *lamport_timestamp,
            Operation::EditBuffer { lamport_timestamp, .. } => *lamport_timestamp,
        }
    }
}

/// One timestamped placement in a file's parent history. `parent: None`
/// records a removal.
#[derive(Clone, Debug, Eq, PartialEq)]
struct ParentRef {
    timestamp: time::Lamport,
    parent: Option<(FileId, String)>,
}

/// One placement under a `(parent, name)` slot. Invisible refs are
/// tombstones: removed nodes, or moves that lost arbitration.
#[derive(Clone, Debug, Eq, PartialEq)]
struct ChildRef {
    timestamp: time::Lamport,
    child_id: FileId,
    visible: bool,
}

/// Text state for one file: operations received before the file was opened
/// are parked until `open_text_file` supplies the base text.
#[derive(Clone, Debug)]
enum TextFile {
    Deferred(Vec<buffer::Operation>),
    Buffered(Buffer),
}

impl TextFile {
    fn is_modified(&self) -> bool {
        match self {
            TextFile::Deferred(ops) => !ops.is_empty(),
            TextFile::Buffered(buffer) => buffer.is_modified(),
        }
    }
}

/// The replicated tree for one replica.
#[derive(Clone, Debug)]
pub struct Tree {
    metadata: HashMap<FileId, FileType>,
    /// Newest-first parent history per file.
    parent_refs: HashMap<FileId, Vec<ParentRef>>,
    /// Placements per parent, per name; visible refs first, then newest first.
    child_refs: BTreeMap<FileId, BTreeMap<String, Vec<ChildRef>>>,
    version: time::Global,
    local_clock: time::Local,
    text_files: HashMap<FileId, TextFile>,
    /// Operations whose targets have not arrived yet, retried after every
    /// applied batch.
    deferred_ops: Vec<Operation>,
    base_entries_next_id: u64,
    pub(crate) base_entries_stack: Vec<FileId>,
}

impl Tree {
    pub fn new(replica_id: time::ReplicaId) -> Self {
        Self {
            metadata: HashMap::new(),
            parent_refs: HashMap::new(),
            child_refs: BTreeMap::new(),
            version: time::Global::new(),
            local_clock: time::Local::new(replica_id),
            text_files: HashMap::new(),
            deferred_ops: Vec::new(),
            base_entries_next_id: 1,
            base_entries_stack: Vec::new(),
        }
    }

    pub fn replica_id(&self) -> time::ReplicaId {
        self.local_clock.replica_id
    }

    pub fn version(&self) -> time::Global {
        self.version.clone()
    }

    pub fn deferred_ops_len(&self) -> usize {
        self.deferred_ops.len()
    }

    // ----- local commands -----

    /// Create a file or directory under `parent_id`. Fails with
    /// `InvalidParent` when the parent is missing, tombstoned, or not a
    /// directory; the failed command leaves no observable mutation.
    pub fn create_file(
        &mut self,
        parent_id: FileId,
        name: &str,
        file_type: FileType,
        lamport_clock: &mut time::Lamport,
    ) -> Result<(FileId, Operation), Error> {
        check_name(name)?;
        if self.file_type_of(parent_id) != Some(FileType::Directory) || !self.is_live(parent_id) {
            return Err(Error::InvalidParent(parent_id));
        }

        let mut new_tree = self.clone();
        let mut new_lamport_clock = *lamport_clock;
        let file_id = FileId::New(new_tree.local_clock.tick());
        let operation = Operation::InsertMetadata {
            file_id,
            file_type,
            parent: Some((parent_id, name.to_string())),
            local_timestamp: new_tree.local_clock.tick(),
            lamport_timestamp: new_lamport_clock.tick(),
        };
        let fixup_ops =
            new_tree.apply_ops_internal(Some(operation.clone()), &mut new_lamport_clock);
        if fixup_ops.is_empty() {
            *lamport_clock = new_lamport_clock;
            *self = new_tree;
            debug!(?file_id, ?parent_id, name, ?file_type, "created file");
            Ok((file_id, operation))
        } else {
            Err(Error::InvalidOperation)
        }
    }

    /// Move and/or rename `file_id`. Fails with `InvalidTarget` when the
    /// file or the new parent is unknown, and with `InvalidOperation` when
    /// the command would require conflict repair on this replica (name
    /// already taken, or a move under the file's own descendant).
    pub fn rename(
        &mut self,
        file_id: FileId,
        new_parent_id: FileId,
        new_name: &str,
        lamport_clock: &mut time::Lamport,
    ) -> Result<Operation, Error> {
        check_name(new_name)?;
        if file_id == ROOT_FILE_ID || self.file_type_of(file_id).is_none() {
            return Err(Error::InvalidTarget(file_id));
        }
        if self.file_type_of(new_parent_id) != Some(FileType::Directory) {
            return Err(Error::InvalidTarget(new_parent_id));
        }

        let mut new_tree = self.clone();
        let mut new_lamport_clock = *lamport_clock;
        let operation = Operation::UpdateParent {
            child_id: file_id,
            new_parent: Some((new_parent_id, new_name.to_string())),
            local_timestamp: new_tree.local_clock.tick(),
            lamport_timestamp: new_lamport_clock.tick(),
        };
        let fixup_ops =
            new_tree.apply_ops_internal(Some(operation.clone()), &mut new_lamport_clock);
        if fixup_ops.is_empty() {
            *lamport_clock = new_lamport_clock;
            *self = new_tree;
            debug!(?file_id, ?new_parent_id, new_name, "renamed file");
            Ok(operation)
        } else {
            Err(Error::InvalidOperation)
        }
    }

    /// Tombstone `file_id` and, logically, its subtree. The node stays
    /// addressable so concurrent operations still merge.
    pub fn remove(
        &mut self,
        file_id: FileId,
        lamport_clock: &mut time::Lamport,
    ) -> Result<Operation, Error> {
        if file_id == ROOT_FILE_ID || self.file_type_of(file_id).is_none() {
            return Err(Error::InvalidTarget(file_id));
        }

        let operation = Operation::UpdateParent {
            child_id: file_id,
            new_parent: None,
            local_timestamp: self.local_clock.tick(),
            lamport_timestamp: lamport_clock.tick(),
        };
        self.apply_op(operation.clone(), lamport_clock);
        debug!(?file_id, "removed file");
        Ok(operation)
    }

    // ----- merge -----

    /// Merge a single remote operation. Returns whether new state was
    /// applied (false means the operation had already been observed) along
    /// with any fixup operations this merge produced.
    pub fn apply(
        &mut self,
        op: Operation,
        lamport_clock: &mut time::Lamport,
    ) -> (bool, Vec<Operation>) {
        if self.version.observed(op.local_timestamp()) {
            trace!(timestamp = ?op.local_timestamp(), "skipping observed operation");
            return (false, Vec::new());
        }
        let fixups = self.apply_ops(Some(op), lamport_clock);
        (true, fixups)
    }

    /// Merge a batch of remote operations in any order, returning emitted
    /// fixup operations. Operations whose targets are unknown are deferred
    /// and retried after each batch.
    pub fn apply_ops<I>(&mut self, ops: I, lamport_clock: &mut time::Lamport) -> Vec<Operation>
    where
        I: IntoIterator<Item = Operation>,
    {
        let mut fixup_ops = self.apply_ops_internal(ops, lamport_clock);
        let deferred_ops = std::mem::take(&mut self.deferred_ops);
        fixup_ops.extend(self.apply_ops_internal(deferred_ops, lamport_clock));
        fixup_ops
    }

    fn apply_ops_internal<I>(
        &mut self,
        ops: I,
        lamport_clock: &mut time::Lamport,
    ) -> Vec<Operation>
    where
        I: IntoIterator<Item = Operation>,
    {
        let mut ops = ops.into_iter().peekable();
        if ops.peek().is_none() {
            return Vec::new();
        }

        let mut deferred_ops = Vec::new();
        let mut potential_conflicts = BTreeSet::new();

        for op in ops {
            if self.version.observed(op.local_timestamp()) {
                continue;
            }
            if self.can_apply_op(&op) {
                match &op {
                    Operation::InsertMetadata { file_id, parent, .. } => {
                        if parent.is_some() {
                            potential_conflicts.insert(*file_id);
                        }
                    }
                    Operation::UpdateParent { child_id, .. } => {
                        potential_conflicts.insert(*child_id);
                    }
                    Operation::EditBuffer { .. } => {}
                }
                self.apply_op(op, lamport_clock);
            } else {
                trace!(timestamp = ?op.local_timestamp(), "deferring operation");
                deferred_ops.push(op);
            }
        }
        self.deferred_ops.extend(deferred_ops);
        self.deferred_ops
            .sort_by_key(|op| op.lamport_timestamp());

        let mut fixup_ops = Vec::new();
        for file_id in potential_conflicts {
            fixup_ops.extend(self.fix_conflicts(file_id, lamport_clock));
        }
        fixup_ops
    }

    fn can_apply_op(&self, op: &Operation) -> bool {
        match op {
            Operation::InsertMetadata { .. } => true,
            Operation::UpdateParent { child_id, .. } => self.file_type_of(*child_id).is_some(),
            Operation::EditBuffer { file_id, .. } => self.file_type_of(*file_id).is_some(),
        }
    }

    fn apply_op(&mut self, op: Operation, lamport_clock: &mut time::Lamport) {
        self.version.observe(op.local_timestamp());
        self.local_clock.observe(op.local_timestamp());
        lamport_clock.observe(op.lamport_timestamp());

        match op {
            Operation::InsertMetadata {
                file_id,
                file_type,
                parent,
                lamport_timestamp,
                ..
            } => {
                if self.metadata.contains_key(&file_id) {
                    return;
                }
                self.metadata.insert(file_id, file_type);
                if let Some((parent_id, name)) = parent {
                    self.insert_parent_ref(
                        file_id,
                        ParentRef {
                            timestamp: lamport_timestamp,
                            parent: Some((parent_id, name.clone())),
                        },
                    );
                    self.insert_child_ref(
                        parent_id,
                        &name,
                        ChildRef {
                            timestamp: lamport_timestamp,
                            child_id: file_id,
                            visible: true,
                        },
                    );
                }
            }
            Operation::UpdateParent {
                child_id,
                new_parent,
                lamport_timestamp,
                ..
            } => {
                self.apply_update_parent(child_id, new_parent, lamport_timestamp);
            }
            Operation::EditBuffer {
                file_id,
                operations,
                ..
            } => {
                match self
                    .text_files
                    .entry(file_id)
                    .or_insert_with(|| TextFile::Deferred(Vec::new()))
                {
                    TextFile::Deferred(deferred) => deferred.extend(operations),
                    TextFile::Buffered(buffer) => {
                        for op in operations {
                            buffer.apply(op);
                        }
                    }
                }
            }
        }
    }

    fn apply_update_parent(
        &mut self,
        child_id: FileId,
        new_parent: Option<(FileId, String)>,
        timestamp: time::Lamport,
    ) {
        let refs = self.parent_refs.get(&child_id).cloned().unwrap_or_default();
        if refs.iter().any(|r| r.timestamp == timestamp) {
            return;
        }

        if let Some(latest) = refs.first() {
            let latest_visible = refs.iter().find(|r| r.parent.is_some()).cloned();
            // The node's current placement: at the latest visible location,
            // visible iff the newest ref is not a removal.
            let current = latest_visible.as_ref().and_then(|lv| {
                let (parent_id, name) = lv.parent.clone()?;
                Some((parent_id, name, lv.timestamp, latest.parent.is_some()))
            });

            if timestamp > latest.timestamp {
                // This write wins: relocate or tombstone the placement.
                if let Some((parent_id, name, ref_timestamp, visible)) = &current {
                    self.remove_child_ref(*parent_id, name, child_id, *ref_timestamp, *visible);
                }
                match &new_parent {
                    Some((parent_id, name)) => {
                        self.insert_child_ref(
                            *parent_id,
                            name,
                            ChildRef {
                                timestamp,
                                child_id,
                                visible: true,
                            },
                        );
                    }
                    None => {
                        if let Some((parent_id, name, ref_timestamp, _)) = &current {
                            // Keep the placement as a tombstone so the node
                            // remains addressable at its last location.
                            self.insert_child_ref(
                                *parent_id,
                                name,
                                ChildRef {
                                    timestamp: *ref_timestamp,
                                    child_id,
                                    visible: false,
                                },
                            );
                        }
                    }
                }
            } else if latest.parent.is_none()
                && new_parent.is_some()
                && latest_visible
                    .as_ref()
                    .map_or(true, |lv| timestamp > lv.timestamp)
            {
                // The node is removed, but this losing move updates where it
                // would live: record it as an invisible placement.
                if let Some((parent_id, name, ref_timestamp, visible)) = &current {
                    self.remove_child_ref(*parent_id, name, child_id, *ref_timestamp, *visible);
                }
                if let Some((parent_id, name)) = &new_parent {
                    self.insert_child_ref(
                        *parent_id,
                        name,
                        ChildRef {
                            timestamp,
                            child_id,
                            visible: false,
                        },
                    );
                }
            }
        } else if let Some((parent_id, name)) = &new_parent {
            self.insert_child_ref(
                *parent_id,
                name,
                ChildRef {
                    timestamp,
                    child_id,
                    visible: true,
                },
            );
        }

        self.insert_parent_ref(
            child_id,
            ParentRef {
                timestamp,
                parent: new_parent,
            },
        );
    }

    // ----- conflict repair -----

    /// Repair conflicts around `file_id` after a merge: break any ancestor
    /// cycle by reverting the most recent move contributing to it, then
    /// repair name collisions at the file's location. Returns the fixup
    /// operations emitted, already applied to this tree.
    fn fix_conflicts(
        &mut self,
        file_id: FileId,
        lamport_clock: &mut time::Lamport,
    ) -> Vec<Operation> {
        let mut fixup_ops = Vec::new();
        let mut reverted_moves: BTreeMap<FileId, time::Lamport> = BTreeMap::new();

        let mut visited = HashSet::new();
        let mut latest_move: Option<(FileId, time::Lamport)> = None;
        let mut current = file_id;

        loop {
            if current == ROOT_FILE_ID {
                break;
            }
            if visited.contains(&current) {
                // Cycle detected. Revert the most recent move contributing
                // to it and keep walking; one reversion may not be enough.
                let Some((moved_child, move_timestamp)) = latest_move.take() else {
                    break;
                };
                let previous = self
                    .parent_refs
                    .get(&moved_child)
                    .and_then(|refs| {
                        refs.iter()
                            .find(|r| r.timestamp < move_timestamp && r.parent.is_some())
                    })
                    .map(|r| r.timestamp);
                match previous {
                    Some(previous_timestamp) => {
                        debug!(?moved_child, "reverting move to break cycle");
                        reverted_moves.insert(moved_child, previous_timestamp);
                    }
                    None => break,
                }
                visited.clear();
                continue;
            }
            visited.insert(current);

            let Some(refs) = self.parent_refs.get(&current) else {
                break;
            };
            // Interpret already-reverted refs as having their reverted value.
            let effective = match reverted_moves.get(&current) {
                Some(reverted_timestamp) => {
                    refs.iter().find(|r| r.timestamp == *reverted_timestamp)
                }
                None => refs.first(),
            };
            let Some(effective) = effective else {
                break;
            };

            let is_move = refs.iter().any(|r| r.timestamp < effective.timestamp);
            if is_move
                && latest_move.map_or(true, |(_, timestamp)| effective.timestamp > timestamp)
            {
                latest_move = Some((current, effective.timestamp));
            }

            match &effective.parent {
                Some((parent_id, _)) => current = *parent_id,
                None => break,
            }
        }

        // Turn the reversions into ordinary move operations so every replica
        // converges on the repaired placement.
        let mut moved_file_ids = Vec::new();
        for (child_id, reverted_timestamp) in &reverted_moves {
            let new_parent = self
                .parent_refs
                .get(child_id)
                .and_then(|refs| refs.iter().find(|r| r.timestamp == *reverted_timestamp))
                .and_then(|r| r.parent.clone());
            let op = Operation::UpdateParent {
                child_id: *child_id,
                new_parent,
                local_timestamp: self.local_clock.tick(),
                lamport_timestamp: lamport_clock.tick(),
            };
            self.apply_op(op.clone(), lamport_clock);
            fixup_ops.push(op);
            moved_file_ids.push(*child_id);
        }

        for moved_file_id in moved_file_ids {
            fixup_ops.extend(self.fix_name_conflicts(moved_file_id, lamport_clock));
        }
        if !reverted_moves.contains_key(&file_id) {
            fixup_ops.extend(self.fix_name_conflicts(file_id, lamport_clock));
        }

        fixup_ops
    }

    /// Repair name collisions at `file_id`'s current location. The occupant
    /// whose placement carries the lowest `(replica, seq)` pair keeps the
    /// name; every other visible occupant is renamed by suffixing `~` until
    /// unique. Both sides of a race run the same rule on the same state, so
    /// the repairs they emit agree.
    fn fix_name_conflicts(
        &mut self,
        file_id: FileId,
        lamport_clock: &mut time::Lamport,
    ) -> Vec<Operation> {
        let mut fixup_ops = Vec::new();

        let Some((parent_id, name)) = self
            .parent_refs
            .get(&file_id)
            .and_then(|refs| refs.first())
            .and_then(|r| r.parent.clone())
        else {
            return fixup_ops;
        };

        loop {
            let occupants: Vec<(time::Lamport, FileId)> = self
                .child_refs
                .get(&parent_id)
                .and_then(|names| names.get(&name))
                .map(|refs| {
                    refs.iter()
                        .filter(|r| r.visible)
                        .map(|r| (r.timestamp, r.child_id))
                        .collect()
                })
                .unwrap_or_default();
            if occupants.len() <= 1 {
                break;
            }

            // Primary occupant: lowest (replica, seq) placement.
            let primary = occupants
                .iter()
                .min_by_key(|(timestamp, _)| (timestamp.replica_id, timestamp.value))
                .map(|(_, child_id)| *child_id);
            let Some(loser) = occupants
                .iter()
                .map(|(_, child_id)| *child_id)
                .find(|child_id| Some(*child_id) != primary)
            else {
                break;
            };

            let unique_name = self.unique_name(parent_id, &name);
            debug!(?loser, ?parent_id, name = %unique_name, "renaming name-conflict loser");
            let op = Operation::UpdateParent {
                child_id: loser,
                new_parent: Some((parent_id, unique_name)),
                local_timestamp: self.local_clock.tick(),
                lamport_timestamp: lamport_clock.tick(),
            };
            self.apply_op(op.clone(), lamport_clock);
            fixup_ops.push(op);
        }

        fixup_ops
    }

    fn unique_name(&self, parent_id: FileId, name: &str) -> String {
        let mut candidate = format!("{}~", name);
        loop {
            let taken = self
                .child_refs
                .get(&parent_id)
                .and_then(|names| names.get(&candidate))
                .map_or(false, |refs| refs.iter().any(|r| r.visible));
            if !taken {
                return candidate;
            }
            candidate.push('~');
        }
    }

    // ----- register maintenance -----

    fn insert_parent_ref(&mut self, child_id: FileId, parent_ref: ParentRef) {
        let refs = self.parent_refs.entry(child_id).or_default();
        if refs.iter().any(|r| r.timestamp == parent_ref.timestamp) {
            return;
        }
        let ix = refs
            .iter()
            .position(|r| r.timestamp < parent_ref.timestamp)
            .unwrap_or(refs.len());
        refs.insert(ix, parent_ref);
    }

    fn insert_child_ref(&mut self, parent_id: FileId, name: &str, child_ref: ChildRef) {
        let refs = self
            .child_refs
            .entry(parent_id)
            .or_default()
            .entry(name.to_string())
            .or_default();
        if refs.contains(&child_ref) {
            return;
        }
        // Visible placements first, then newest first.
        let key = (!child_ref.visible, std::cmp::Reverse(child_ref.timestamp));
        let ix = refs
            .iter()
            .position(|r| (!r.visible, std::cmp::Reverse(r.timestamp)) > key)
            .unwrap_or(refs.len());
        refs.insert(ix, child_ref);
    }

    fn remove_child_ref(
        &mut self,
        parent_id: FileId,
        name: &str,
        child_id: FileId,
        timestamp: time::Lamport,
        visible: bool,
    ) {
        if let Some(names) = self.child_refs.get_mut(&parent_id) {
            if let Some(refs) = names.get_mut(name) {
                refs.retain(|r| {
                    !(r.child_id == child_id && r.timestamp == timestamp && r.visible == visible)
                });
                if refs.is_empty() {
                    names.remove(name);
                }
            }
            if names.is_empty() {
                self.child_refs.remove(&parent_id);
            }
        }
    }

    // ----- queries -----

    pub fn file_type(&self, file_id: FileId) -> Result<FileType, Error> {
        self.file_type_of(file_id)
            .ok_or(Error::InvalidTarget(file_id))
    }

    fn file_type_of(&self, file_id: FileId) -> Option<FileType> {
        if file_id == ROOT_FILE_ID {
            Some(FileType::Directory)
        } else {
            self.metadata.get(&file_id).copied()
        }
    }

    fn latest_parent_ref(&self, file_id: FileId) -> Option<&ParentRef> {
        self.parent_refs.get(&file_id).and_then(|refs| refs.first())
    }

    fn oldest_parent_ref(&self, file_id: FileId) -> Option<&ParentRef> {
        self.parent_refs.get(&file_id).and_then(|refs| refs.last())
    }

    /// True when the node resolves to the root through live placements.
    pub fn is_live(&self, file_id: FileId) -> bool {
        let mut visited = HashSet::new();
        let mut current = file_id;
        loop {
            if current == ROOT_FILE_ID {
                return true;
            }
            if !visited.insert(current) {
                return false;
            }
            match self.latest_parent_ref(current).and_then(|r| r.parent.as_ref()) {
                Some((parent_id, _)) => current = *parent_id,
                None => return false,
            }
        }
    }

    /// Resolve a `/`-separated path to a file id.
    pub fn file_id_for_path(&self, path: &str) -> Result<FileId, Error> {
        let mut current = ROOT_FILE_ID;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let child = self
                .child_refs
                .get(&current)
                .and_then(|names| names.get(component))
                .and_then(|refs| refs.first())
                .filter(|r| r.visible)
                .map(|r| r.child_id);
            match child {
                Some(child_id) => current = child_id,
                None => {
                    return Err(Error::NotFound(format!("no file at path {:?}", path)));
                }
            }
        }
        Ok(current)
    }

    /// Current path of a live node, or None for tombstoned or detached
    /// nodes.
    pub fn path_for_file_id(&self, file_id: FileId) -> Option<String> {
        if file_id == ROOT_FILE_ID {
            return Some(String::new());
        }
        let mut components = Vec::new();
        let mut visited = HashSet::new();
        let mut current = file_id;
        loop {
            if !visited.insert(current) {
                return None;
            }
            let (parent_id, name) = self
                .latest_parent_ref(current)
                .and_then(|r| r.parent.clone())?;
            components.push(name);
            if parent_id == ROOT_FILE_ID {
                break;
            }
            current = parent_id;
        }
        components.reverse();
        Some(components.join("/"))
    }

    // ----- buffers -----

    /// Bind literal base text to `file_id`, making it editable. Buffer
    /// operations that arrived before the open are replayed onto the seeded
    /// buffer.
    pub fn open_text_file(&mut self, file_id: FileId, base_text: &str) -> Result<(), Error> {
        if self.file_type_of(file_id) != Some(FileType::Text) {
            return Err(Error::InvalidTarget(file_id));
        }

        match self.text_files.remove(&file_id) {
            Some(TextFile::Deferred(operations)) => {
                let mut buffer = Buffer::new(base_text);
                for op in operations {
                    buffer.apply(op);
                }
                self.text_files.insert(file_id, TextFile::Buffered(buffer));
            }
            Some(buffered) => {
                self.text_files.insert(file_id, buffered);
            }
            None => {
                self.text_files
                    .insert(file_id, TextFile::Buffered(Buffer::new(base_text)));
            }
        }
        Ok(())
    }

    pub fn is_open(&self, file_id: FileId) -> bool {
        matches!(self.text_files.get(&file_id), Some(TextFile::Buffered(_)))
    }

    pub fn text(&self, file_id: FileId) -> Result<String, Error> {
        Ok(self.buffer(file_id)?.text())
    }

    pub fn buffer_version(&self, file_id: FileId) -> Result<time::Global, Error> {
        Ok(self.buffer(file_id)?.version().clone())
    }

    pub fn changes_since(
        &self,
        file_id: FileId,
        version: &time::Global,
    ) -> Result<Vec<RangeWithText>, Error> {
        Ok(self.buffer(file_id)?.changes_since(version))
    }

    pub fn is_modified_file(&self, file_id: FileId) -> bool {
        self.text_files
            .get(&file_id)
            .map_or(false, |f| f.is_modified())
    }

    /// Splice `new_text` over `old_ranges` (char offsets) in one atomic
    /// multi-splice, emitting a single operation.
    pub fn edit(
        &mut self,
        file_id: FileId,
        old_ranges: &[Range<usize>],
        new_text: &str,
        lamport_clock: &mut time::Lamport,
    ) -> Result<Operation, Error> {
        self.mutate_buffer(file_id, lamport_clock, |buffer, local_clock, lamport_clock| {
            buffer.edit(old_ranges, new_text, local_clock, lamport_clock)
        })
    }

    /// Like [`Tree::edit`], with point ranges.
    pub fn edit_2d(
        &mut self,
        file_id: FileId,
        old_ranges: &[Range<Point>],
        new_text: &str,
        lamport_clock: &mut time::Lamport,
    ) -> Result<Operation, Error> {
        self.mutate_buffer(file_id, lamport_clock, |buffer, local_clock, lamport_clock| {
            buffer.edit_2d(old_ranges, new_text, local_clock, lamport_clock)
        })
    }

    fn mutate_buffer<F>(
        &mut self,
        file_id: FileId,
        lamport_clock: &mut time::Lamport,
        mutate: F,
    ) -> Result<Operation, Error>
    where
        F: FnOnce(
            &mut Buffer,
            &mut time::Local,
            &mut time::Lamport,
        ) -> Result<Vec<buffer::Operation>, Error>,
    {
        let Some(TextFile::Buffered(buffer)) = self.text_files.get_mut(&file_id) else {
            return Err(Error::NotFound(format!(
                "file {:?} has not been opened",
                file_id
            )));
        };
        let operations = mutate(buffer, &mut self.local_clock, lamport_clock)?;
        let local_timestamp = self.local_clock.tick();
        self.version.observe(local_timestamp);
        Ok(Operation::EditBuffer {
            file_id,
            operations,
            local_timestamp,
            lamport_timestamp: lamport_clock.tick(),
        })
    }

    fn buffer(&self, file_id: FileId) -> Result<&Buffer, Error> {
        match self.text_files.get(&file_id) {
            Some(TextFile::Buffered(buffer)) => Ok(buffer),
            _ => Err(Error::NotFound(format!(
                "file {:?} has not been opened",
                file_id
            ))),
        }
    }

    // ----- baseline bookkeeping (shared with `baseline`) -----

    pub(crate) fn next_base_file_id(&mut self) -> FileId {
        let file_id = FileId::Base(self.base_entries_next_id);
        self.base_entries_next_id += 1;
        file_id
    }

    pub(crate) fn has_visible_occupant(&self, parent_id: FileId, name: &str) -> bool {
        self.child_refs
            .get(&parent_id)
            .and_then(|names| names.get(name))
            .map_or(false, |refs| refs.iter().any(|r| r.visible))
    }

    pub(crate) fn insert_base_node(
        &mut self,
        file_id: FileId,
        file_type: FileType,
        parent_id: FileId,
        name: &str,
    ) {
        self.metadata.insert(file_id, file_type);
        self.insert_parent_ref(
            file_id,
            ParentRef {
                timestamp: time::Lamport::default(),
                parent: Some((parent_id, name.to_string())),
            },
        );
        self.insert_child_ref(
            parent_id,
            name,
            ChildRef {
                timestamp: time::Lamport::default(),
                child_id: file_id,
                visible: true,
            },
        );
    }

    pub(crate) fn drain_deferred(&mut self, lamport_clock: &mut time::Lamport) -> Vec<Operation> {
        let deferred_ops = std::mem::take(&mut self.deferred_ops);
        self.apply_ops_internal(deferred_ops, lamport_clock)
    }

    pub(crate) fn fix_name_conflicts_for(
        &mut self,
        file_id: FileId,
        lamport_clock: &mut time::Lamport,
    ) -> Vec<Operation> {
        self.fix_name_conflicts(file_id, lamport_clock)
    }

    pub(crate) fn entry_status(&self, file_id: FileId) -> (FileStatus, bool) {
        let newest = self.latest_parent_ref(file_id);
        let oldest = self.oldest_parent_ref(file_id);
        match file_id {
            FileId::Base(_) => {
                let newest_parent = newest.and_then(|r| r.parent.as_ref());
                let oldest_parent = oldest.and_then(|r| r.parent.as_ref());
                if newest_parent.is_none() {
                    (FileStatus::Removed, false)
                } else if newest_parent == oldest_parent {
                    if self.is_modified_file(file_id) {
                        (FileStatus::Modified, true)
                    } else {
                        (FileStatus::Unchanged, true)
                    }
                } else if self.is_modified_file(file_id) {
                    (FileStatus::RenamedAndModified, true)
                } else {
                    (FileStatus::Renamed, true)
                }
            }
            FileId::New(_) => {
                let alive = newest.map_or(false, |r| r.parent.is_some());
                (FileStatus::New, alive)
            }
        }
    }

    pub(crate) fn child_placements(
        &self,
        parent_id: FileId,
    ) -> Vec<(String, FileId, bool)> {
        let mut placements = Vec::new();
        if let Some(names) = self.child_refs.get(&parent_id) {
            for (name, refs) in names {
                for child_ref in refs {
                    placements.push((name.clone(), child_ref.child_id, child_ref.visible));
                }
            }
        }
        placements
    }
}

fn check_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidArgument(format!(
            "invalid file name {:?}",
            name
        )));
    }
    Ok(())
}
