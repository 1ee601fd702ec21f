//! Error types for the repository facade.

use notp_core::{ObjectError, Oid};
use notp_store::StoreError;
use notp_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum NotpError {
    /// Object encoding or decoding failed.
    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// A tree references an object the store does not hold.
    #[error("object not found: {0}")]
    MissingObject(Oid),

    /// The ref moved between reading and updating it.
    #[error("ref {name} moved from {expected} during commit")]
    RefMoved { name: String, expected: Oid },
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, NotpError>;
