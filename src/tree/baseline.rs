//! Baseline import
//!
//! Streams a depth-first listing of an external snapshot into the tree.
//! Imported nodes get densely assigned `FileId::Base` ids and placements
//! timestamped at the Lamport origin, so every replica importing the same
//! baseline derives byte-identical base state without exchanging operations.

use super::{FileType, Operation, Tree, ROOT_FILE_ID};
use crate::error::Error;
use crate::time;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One row of a depth-first baseline listing. `depth` is 1 for entries
/// directly under the root.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BaseEntry {
    pub depth: usize,
    pub name: String,
    pub file_type: FileType,
}

impl BaseEntry {
    pub fn dir(depth: usize, name: &str) -> Self {
        Self {
            depth,
            name: name.to_string(),
            file_type: FileType::Directory,
        }
    }

    pub fn file(depth: usize, name: &str) -> Self {
        Self {
            depth,
            name: name.to_string(),
            file_type: FileType::Text,
        }
    }
}

impl Tree {
    /// Append a chunk of baseline entries. Chunks may arrive incrementally;
    /// the directory stack persists across calls. Base entries take
    /// precedence in name conflicts with concurrently created files, which
    /// are renamed via fixup operations. Deferred remote operations are
    /// retried afterwards since imported nodes may satisfy them.
    pub fn append_base_entries<I>(
        &mut self,
        entries: I,
        lamport_clock: &mut time::Lamport,
    ) -> Result<Vec<Operation>, Error>
    where
        I: IntoIterator<Item = BaseEntry>,
    {
        let mut name_conflicts = Vec::new();
        let mut count = 0usize;

        for entry in entries {
            let stack_depth = self.base_entries_stack.len();
            if entry.depth == 0 || entry.depth > stack_depth + 1 {
                return Err(Error::InvalidBaseEntry(format!(
                    "entry {:?} has depth {} but the open directory stack has depth {}",
                    entry.name, entry.depth, stack_depth
                )));
            }
            self.base_entries_stack.truncate(entry.depth - 1);

            let parent_id = self
                .base_entries_stack
                .last()
                .copied()
                .unwrap_or(ROOT_FILE_ID);
            let file_id = self.next_base_file_id();
            if self.has_visible_occupant(parent_id, &entry.name) {
                name_conflicts.push(file_id);
            }
            self.insert_base_node(file_id, entry.file_type, parent_id, &entry.name);
            if entry.file_type == FileType::Directory {
                self.base_entries_stack.push(file_id);
            }
            count += 1;
        }
        debug!(count, conflicts = name_conflicts.len(), "appended base entries");

        let mut fixup_ops = Vec::new();
        for file_id in name_conflicts {
            fixup_ops.extend(self.fix_name_conflicts_for(file_id, lamport_clock));
        }
        fixup_ops.extend(self.drain_deferred(lamport_clock));
        Ok(fixup_ops)
    }
}
