//! Error types for object stores.

use notp_core::{ObjectError, Oid};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored or supplied object failed to decode.
    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    /// Object is not in the store.
    #[error("object not found: {0}")]
    NotFound(Oid),

    /// A row that does not hold what its schema promises.
    #[error("corrupt row: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Blocking task failed to complete.
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
