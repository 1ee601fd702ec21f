//! # NOTP Core
//!
//! Pure primitives for the Network Object Transfer Protocol: packet framing,
//! content-addressed objects, and commit history traversal.
//!
//! This crate contains no I/O, no storage, no networking. Objects are fetched
//! through caller-supplied closures so that history walks stay pure.
//!
//! ## Key Types
//!
//! - [`Packet`] - An opaque framed byte buffer exchanged between peers
//! - [`PacketWriter`] / [`PacketReader`] - Protocol and stream segment codec
//! - [`Oid`] - Content address of an object (SHA-256 of its payload)
//! - [`Object`] - Header + NUL + payload, immutable once created
//! - [`Commit`], [`Tree`] - Typed object payloads
//!
//! ## Wire layout
//!
//! All integers are fixed-width little-endian. See [`segment`] for the byte
//! layout of each segment kind.

pub mod commit;
pub mod error;
pub mod history;
pub mod object;
pub mod oid;
pub mod packet;
pub mod segment;
pub mod tree;

pub use commit::{
    deserialize_commit, serialize_commit, Commit, CommitBuilder, Identity, MAX_OFFSET_MINUTES,
};
pub use error::{ObjectError, PacketError};
pub use history::{build_commit_history, walk_commit_history, CommitHistory, HistoryWalk};
pub use object::{
    create_blob_object, create_commit_object, create_tree_object, get_object_info, Object,
    ObjectInfo, ObjectInstance, ObjectType,
};
pub use oid::Oid;
pub use packet::{Packet, PacketReader, PacketStream, PacketWriter, ProtocolHeader};
pub use segment::{
    increment_stream_counter, read_data_segment, read_protocol_segment, read_stream_segment,
    write_data_segment, write_protocol_segment, write_stream_segment, StreamSegment, DELIMITER,
};
pub use tree::{deserialize_tree, serialize_tree, EntryType, Tree, TreeEntry};
