//! # NOTP Store
//!
//! Storage abstraction for NOTP objects and refs. Provides a trait-based
//! interface with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`ObjectStore`] - The async trait for all storage operations
//! - [`StoreExt`] - History walks and reachability built on top of it
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use notp_core::create_blob_object;
//! use notp_store::{ObjectStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("objects.db").unwrap();
//!     let blob = create_blob_object(b"hello").unwrap();
//!     store.insert_object(&blob).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: objects are immutable and keyed by OID, so a
//!   second insert of the same object returns `AlreadyExists`
//! - **Verified reads**: objects coming out of storage are re-hashed before
//!   they are handed back
//! - **Ref updates** go through compare-and-set so concurrent writers cannot
//!   silently drop each other's commits

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, ObjectStore, StoreExt};
