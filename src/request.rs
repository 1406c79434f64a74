//! Request surface
//!
//! A closed, tagged message type per operation, dispatched exhaustively.
//! [`Service`] owns a registry of work trees keyed by opaque handles, so one
//! process can host several replicas without shared state between them.

use crate::buffer::{Point, RangeWithText};
use crate::config::WorkTreeConfig;
use crate::error::Error;
use crate::time;
use crate::tree::{BaseEntry, Entry, FileId, Operation, ROOT_FILE_ID};
use crate::worktree::{BufferId, WorkTree};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub type TreeHandle = u64;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    CreateWorkTree {
        replica_id: time::ReplicaId,
    },
    GetRootFileId,
    GetVersion {
        tree: TreeHandle,
    },
    AppendBaseEntries {
        tree: TreeHandle,
        entries: Vec<BaseEntry>,
    },
    ApplyOperations {
        tree: TreeHandle,
        operations: Vec<Operation>,
    },
    NewTextFile {
        tree: TreeHandle,
        parent_id: FileId,
        name: String,
    },
    CreateDirectory {
        tree: TreeHandle,
        parent_id: FileId,
        name: String,
    },
    Rename {
        tree: TreeHandle,
        file_id: FileId,
        new_parent_id: FileId,
        new_name: String,
    },
    Remove {
        tree: TreeHandle,
        file_id: FileId,
    },
    FileIdForPath {
        tree: TreeHandle,
        path: String,
    },
    PathForFileId {
        tree: TreeHandle,
        file_id: FileId,
    },
    Entries {
        tree: TreeHandle,
        show_deleted: Option<bool>,
        descend_into: Option<Vec<FileId>>,
    },
    OpenTextFile {
        tree: TreeHandle,
        file_id: FileId,
        base_text: String,
    },
    GetText {
        tree: TreeHandle,
        buffer_id: BufferId,
    },
    Edit {
        tree: TreeHandle,
        buffer_id: BufferId,
        ranges: Vec<Range<Point>>,
        new_text: String,
    },
    ChangesSince {
        tree: TreeHandle,
        buffer_id: BufferId,
        version: time::Global,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    WorkTreeCreated {
        tree: TreeHandle,
    },
    RootFileId {
        file_id: FileId,
    },
    Version {
        version: time::Global,
    },
    Operations {
        operations: Vec<Operation>,
    },
    FileCreated {
        file_id: FileId,
        operation: Operation,
    },
    OperationEmitted {
        operation: Operation,
    },
    FileId {
        file_id: FileId,
    },
    Path {
        path: String,
    },
    Entries {
        entries: Vec<Entry>,
    },
    BufferOpened {
        buffer_id: BufferId,
    },
    Text {
        text: String,
    },
    Changes {
        changes: Vec<RangeWithText>,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl From<Error> for Response {
    fn from(error: Error) -> Self {
        Response::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Default)]
pub struct Service {
    trees: RwLock<HashMap<TreeHandle, Mutex<WorkTree>>>,
    next_handle: AtomicU64,
}

impl Service {
    pub fn new() -> Self {
        Self {
            trees: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn request(&self, request: Request) -> Response {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(error) => {
                debug!(kind = error.kind(), %error, "request failed");
                error.into()
            }
        }
    }

    fn dispatch(&self, request: Request) -> Result<Response, Error> {
        match request {
            Request::CreateWorkTree { replica_id } => {
                let work_tree = WorkTree::new(WorkTreeConfig::new(replica_id))?;
                let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
                self.trees.write().insert(handle, Mutex::new(work_tree));
                Ok(Response::WorkTreeCreated { tree: handle })
            }
            Request::GetRootFileId => Ok(Response::RootFileId {
                file_id: ROOT_FILE_ID,
            }),
            Request::GetVersion { tree } => self.with_tree(tree, |work_tree| {
                Ok(Response::Version {
                    version: work_tree.version(),
                })
            }),
            Request::AppendBaseEntries { tree, entries } => {
                self.with_tree(tree, |work_tree| {
                    Ok(Response::Operations {
                        operations: work_tree.append_base_entries(entries)?,
                    })
                })
            }
            Request::ApplyOperations { tree, operations } => {
                self.with_tree(tree, |work_tree| {
                    Ok(Response::Operations {
                        operations: work_tree.apply_ops(operations),
                    })
                })
            }
            Request::NewTextFile {
                tree,
                parent_id,
                name,
            } => self.with_tree(tree, |work_tree| {
                let (file_id, operation) = work_tree.new_text_file(parent_id, &name)?;
                Ok(Response::FileCreated { file_id, operation })
            }),
            Request::CreateDirectory {
                tree,
                parent_id,
                name,
            } => self.with_tree(tree, |work_tree| {
                let (file_id, operation) = work_tree.create_directory(parent_id, &name)?;
                Ok(Response::FileCreated { file_id, operation })
            }),
            Request::Rename {
                tree,
                file_id,
                new_parent_id,
                new_name,
            } => self.with_tree(tree, |work_tree| {
                Ok(Response::OperationEmitted {
                    operation: work_tree.rename(file_id, new_parent_id, &new_name)?,
                })
            }),
            Request::Remove { tree, file_id } => self.with_tree(tree, |work_tree| {
                Ok(Response::OperationEmitted {
                    operation: work_tree.remove(file_id)?,
                })
            }),
            Request::FileIdForPath { tree, path } => self.with_tree(tree, |work_tree| {
                Ok(Response::FileId {
                    file_id: work_tree.file_id_for_path(&path)?,
                })
            }),
            Request::PathForFileId { tree, file_id } => self.with_tree(tree, |work_tree| {
                Ok(Response::Path {
                    path: work_tree.path_for_file_id(file_id)?,
                })
            }),
            Request::Entries {
                tree,
                show_deleted,
                descend_into,
            } => self.with_tree(tree, |work_tree| {
                let descend_into: Option<HashSet<FileId>> =
                    descend_into.map(|dirs| dirs.into_iter().collect());
                Ok(Response::Entries {
                    entries: work_tree.entries(show_deleted, descend_into.as_ref()),
                })
            }),
            Request::OpenTextFile {
                tree,
                file_id,
                base_text,
            } => self.with_tree(tree, |work_tree| {
                Ok(Response::BufferOpened {
                    buffer_id: work_tree.open_text_file(file_id, &base_text)?,
                })
            }),
            Request::GetText { tree, buffer_id } => self.with_tree(tree, |work_tree| {
                Ok(Response::Text {
                    text: work_tree.text(buffer_id)?,
                })
            }),
            Request::Edit {
                tree,
                buffer_id,
                ranges,
                new_text,
            } => self.with_tree(tree, |work_tree| {
                Ok(Response::OperationEmitted {
                    operation: work_tree.edit_2d(buffer_id, &ranges, &new_text)?,
                })
            }),
            Request::ChangesSince {
                tree,
                buffer_id,
                version,
            } => self.with_tree(tree, |work_tree| {
                Ok(Response::Changes {
                    changes: work_tree.changes_since(buffer_id, &version)?,
                })
            }),
        }
    }

    fn with_tree<F>(&self, handle: TreeHandle, f: F) -> Result<Response, Error>
    where
        F: FnOnce(&mut WorkTree) -> Result<Response, Error>,
    {
        let trees = self.trees.read();
        let work_tree = trees
            .get(&handle)
            .ok_or_else(|| Error::NotFound(format!("no work tree with handle {}", handle)))?;
        let mut work_tree = work_tree.lock();
        f(&mut work_tree)
    }
}
