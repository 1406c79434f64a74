//! Error types for the replicated work tree.

use crate::tree::FileId;
use thiserror::Error;

/// Errors reported synchronously at the point of the offending command.
///
/// Merge-time conflicts (name collisions, racing moves, cycles) are never
/// errors; they are resolved deterministically by the CRDT merge rules.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid parent: {0:?}")]
    InvalidParent(FileId),

    #[error("Invalid target: {0:?}")]
    InvalidTarget(FileId),

    #[error("Invalid base entry: {0}")]
    InvalidBaseEntry(String),

    #[error("Invalid operation")]
    InvalidOperation,

    #[error("Reset superseded by a newer reset")]
    StaleReset,

    #[error("Io provider error: {0}")]
    Io(String),
}

impl Error {
    /// Stable machine-readable kind, used by the request surface.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::NotFound(_) => "not_found",
            Error::InvalidParent(_) => "invalid_parent",
            Error::InvalidTarget(_) => "invalid_target",
            Error::InvalidBaseEntry(_) => "invalid_base_entry",
            Error::InvalidOperation => "invalid_operation",
            Error::StaleReset => "stale_reset",
            Error::Io(_) => "io",
        }
    }
}
