//! # NOTP Testkit
//!
//! Testing utilities for NOTP.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known objects and packets with expected bytes and OIDs
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Deterministic repositories and wired-up sync sessions
//!
//! ## Golden Vectors
//!
//! Golden vectors pin the object and packet encodings across implementations:
//!
//! ```rust
//! use notp_testkit::vectors::{all_vectors, object_from_vector};
//!
//! for vector in all_vectors() {
//!     let object = object_from_vector(&vector).unwrap();
//!     println!("{}: {}", vector.name, object.oid().to_hex());
//! }
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use notp_testkit::generators::{commit_from_params, CommitParams};
//!
//! proptest! {
//!     #[test]
//!     fn commit_oid_is_deterministic(params: CommitParams) {
//!         let a = commit_from_params(&params);
//!         let b = commit_from_params(&params);
//!         prop_assert_eq!(a.oid(), b.oid());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! Quickly set up a sync scenario:
//!
//! ```rust,no_run
//! use notp_testkit::fixtures::{run_session, RepoFixture};
//! use notp::OperationType;
//!
//! # async fn example() -> notp::Result<()> {
//! let leader = RepoFixture::new("leader");
//! let follower = RepoFixture::new("follower");
//! follower.commit_files(&[("README", "hello")], "init").await?;
//!
//! let (l, f) = run_session(OperationType::Push, &leader, &follower).await?;
//! assert_eq!(l?.local_head_after, f?.local_head_after);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    connected_transports, repo_fixtures, run_session, PacketCapture, RepoFixture, SessionResults,
};
pub use generators::{commit_from_params, CommitParams};
pub use vectors::{all_vectors, object_from_vector, verify_all_vectors, GoldenVector};
