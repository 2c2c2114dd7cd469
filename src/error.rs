//! Error taxonomy for snapshots, readers, serialization and the commit log.

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors returned by tree, snapshot, reader and store operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Operation on a snapshot, reader or tree that was already closed.
    #[error("already closed")]
    AlreadyClosed,

    /// Snapshot close attempted while readers are still open.
    #[error("readers not closed")]
    ReadersNotClosed,

    /// Tree close attempted while snapshots are still open.
    #[error("snapshots not closed")]
    SnapshotsNotClosed,

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("key not found")]
    KeyNotFound,

    /// A reader has no (more) entries to produce.
    #[error("no more entries")]
    NoMoreEntries,

    /// A persisted record failed validation.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl TreeError {
    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        TreeError::Corrupted(msg.into())
    }

    pub(crate) fn illegal(msg: impl Into<String>) -> Self {
        TreeError::IllegalArgument(msg.into())
    }
}
