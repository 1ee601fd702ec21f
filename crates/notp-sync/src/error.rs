//! Error types for the sync module.

use std::time::Duration;

use notp_core::{ObjectError, Oid, PacketError};
use notp_store::StoreError;
use thiserror::Error;

/// Errors that can occur during transport, state machine, or protocol
/// operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Packet framing failed.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// Object encoding or history walk failed.
    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    // ─────────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────────
    #[error("transport has no packet sender")]
    MissingSender,

    #[error("transport has no packet receiver")]
    MissingReceiver,

    #[error("invalid operation: {0:?}")]
    InvalidOperation(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────
    #[error("no packets available")]
    NoPacketsAvailable,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("timed out after {0:?} waiting for a packet")]
    Timeout(Duration),

    #[error("sync cancelled")]
    Cancelled,

    // ─────────────────────────────────────────────────────────────────────────
    // Protocol
    // ─────────────────────────────────────────────────────────────────────────
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: i16, peer: i16 },

    #[error("operation mismatch: expected {expected}, peer sent {got}")]
    OperationMismatch { expected: i16, got: i16 },

    #[error("unexpected phase: expected {expected}, got {got}")]
    UnexpectedPhase { expected: String, got: String },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The peer refused the exchange.
    #[error("rejected by peer: {0}")]
    Rejected(String),

    /// Remote history does not extend local history.
    #[error("non-fast-forward: {base} is not an ancestor of {head}")]
    NonFastForward { base: Oid, head: Oid },

    #[error("missing objects after exchange: {0}")]
    MissingObjects(String),

    /// The local ref moved while the session was running.
    #[error("ref {name} changed concurrently (expected {expected})")]
    RefConflict { name: String, expected: Oid },
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
