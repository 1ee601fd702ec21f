//! Error types for NOTP Core.

use thiserror::Error;

use crate::oid::Oid;

/// Errors raised while framing or parsing packet segments.
///
/// None of these are retried. A decode failure means the peers are out of
/// sync and the exchange has to be aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("malformed header at offset {offset}: expected {expected} bytes, found {actual}")]
    MalformedHeader {
        offset: usize,
        expected: usize,
        actual: usize,
    },

    #[error("delimiter not found at offset {offset}")]
    DelimiterNotFound { offset: usize },

    #[error("truncated payload at offset {offset}: declared {declared} bytes, {available} available")]
    TruncatedPayload {
        offset: usize,
        declared: usize,
        available: usize,
    },

    #[error("payload of {0} bytes does not fit a u32 length field")]
    PayloadTooLarge(usize),

    #[error("invalid protocol field size {size} at offset {offset}")]
    InvalidFieldSize { offset: usize, size: u16 },

    #[error("stream counter overflow at offset {0}")]
    CounterOverflow(usize),

    #[error("invalid stream counter {0}")]
    InvalidStreamCounter(u32),

    #[error("protocol segment must be written first")]
    MissingProtocol,

    #[error("protocol segment already written")]
    ProtocolAlreadyWritten,

    #[error("stream type mismatch: open stream is {expected}, got {got}")]
    StreamTypeMismatch { expected: u32, got: u32 },

    #[error("{0} trailing bytes after last segment")]
    TrailingBytes(usize),
}

/// Errors raised while encoding or decoding objects and walking history.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("empty object data")]
    EmptyData,

    #[error("blob data must not be empty")]
    EmptyBlobData,

    #[error("object content has no header separator")]
    MissingSeparator,

    #[error("invalid object header: {0}")]
    InvalidHeader(String),

    #[error("content length mismatch: header declares {declared}, payload has {actual}")]
    ContentLengthMismatch { declared: usize, actual: usize },

    #[error("unsupported object type: {0}")]
    UnsupportedObjectType(String),

    #[error("object {oid} does not match its content (computed {computed})")]
    OidMismatch { oid: Oid, computed: Oid },

    #[error("expected {expected} object at {oid}, found {actual}")]
    UnexpectedObjectType {
        oid: Oid,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid tree entry format: {0:?}")]
    InvalidEntryFormat(String),

    #[error("invalid tree entry name: {0:?}")]
    InvalidEntryName(String),

    #[error("invalid tree entry mode: {0:o}")]
    InvalidEntryMode(u32),

    #[error("duplicate tree entry: {0}")]
    DuplicateEntry(String),

    #[error("invalid oid: {0}")]
    InvalidOid(String),

    #[error("invalid history range: cannot walk from the zero oid to {to}")]
    InvalidRange { to: Oid },

    #[error("history cycle detected at {0}")]
    HistoryCycle(Oid),
}
