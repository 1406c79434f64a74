//! weft
//!
//! A multi-replica, conflict-free synchronization engine for a hierarchical
//! file tree and the text buffers it contains. Each replica edits its own
//! [`worktree::WorkTree`] locally; the operations those edits emit can be
//! shipped to other replicas in any order, and every replica that observes
//! the same operation set converges to the same tree and text.
//!
//! Layering, leaves first: [`time`] (logical clocks), [`oplog`] (the
//! shippable operation record), [`buffer`] (per-file sequence CRDT),
//! [`tree`] (namespace CRDT, baseline import, entry projection),
//! [`worktree`] (one replica's orchestrator, including baseline resets via
//! an [`io::IoProvider`]), and [`request`] (a tagged request/response
//! surface for embedding behind a message boundary).

pub mod buffer;
pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod oplog;
pub mod request;
pub mod time;
pub mod tree;
pub mod worktree;

pub use buffer::{Buffer, Point, RangeWithText};
pub use config::WorkTreeConfig;
pub use error::Error;
pub use io::{BaselineId, IoProvider};
pub use logging::{init_logging, LoggingConfig};
pub use oplog::OperationLog;
pub use request::{Request, Response, Service, TreeHandle};
pub use time::ReplicaId;
pub use tree::{
    BaseEntry, Entry, FileId, FileStatus, FileType, Operation, ROOT_FILE_ID,
};
pub use worktree::{BufferId, SharedWorkTree, WorkTree};
