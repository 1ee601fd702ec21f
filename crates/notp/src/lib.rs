//! # NOTP
//!
//! The unified API for the Network Object Transfer Protocol: content-addressed
//! repositories that converge through leader/follower sync sessions.
//!
//! ## Overview
//!
//! - **Objects**: Immutable blobs, trees and commits addressed by the SHA-256
//!   of their payload
//! - **Refs**: Named pointers to commits that only move by compare-and-set
//! - **Packets**: Framed protocol and stream segments exchanged by peers
//! - **Sync**: Push or pull of missing history between a leader and a follower
//!
//! ## Usage
//!
//! ```rust,no_run
//! use notp::{OperationType, Repository, RepositoryConfig};
//! use notp::store::MemoryStore;
//! use notp::sync::{duplex, ReceivePolicy};
//!
//! async fn example() -> notp::Result<()> {
//!     let leader = Repository::new(MemoryStore::new(), RepositoryConfig::default());
//!     let follower = Repository::new(
//!         MemoryStore::new(),
//!         RepositoryConfig::default().with_author("Alice"),
//!     );
//!
//!     follower.commit([("README", "hello")], "init").await?;
//!
//!     let (a, b) = duplex(ReceivePolicy::Forever);
//!     let (leader_report, follower_report) = tokio::join!(
//!         leader.sync_as_leader(OperationType::Push, a.build()?),
//!         follower.sync_as_follower(OperationType::Push, b.build()?),
//!     );
//!     assert_eq!(leader_report?.local_head_after, follower_report?.local_head_before);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `notp::core` - Packet codec, objects, commits, trees, history walks
//! - `notp::store` - Object store abstraction, memory and SQLite backends
//! - `notp::sync` - Transport, state machine engine, leader/follower roles

pub mod error;
pub mod repository;

// Re-export component crates
pub use notp_core as core;
pub use notp_store as store;
pub use notp_sync as sync;

// Re-export main types for convenience
pub use error::{NotpError, Result};
pub use repository::{Repository, RepositoryConfig};

// Re-export commonly used types
pub use notp_core::{Commit, Identity, Object, ObjectType, Oid, Packet, Tree, TreeEntry};
pub use notp_store::{MemoryStore, ObjectStore, SqliteStore, StoreExt};
pub use notp_sync::{
    ConvergenceResult, OperationType, Role, SyncConfig, SyncError, SyncReport, Transport,
};
