//! # NOTP Sync
//!
//! Transport abstraction, state machine engine and the NOTP leader/follower
//! roles that move commits between two object stores.
//!
//! ## Overview
//!
//! A session runs two [`StateMachine`]s, one per peer, each on its own task
//! and each holding one half of a cross-wired [`Transport`]. The follower
//! opens the session. On `push` the follower sends objects, on `pull` the
//! leader does.
//!
//! ## Key Properties
//!
//! - **Fast-forward only**: a ref only moves to a descendant of its value
//! - **Idempotent**: objects are content-addressed, re-running a sync is safe
//! - **Verified**: every received object is re-hashed before it is stored
//! - **Atomic ref update**: the ref advances by compare-and-set after all
//!   objects are present
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use notp_store::MemoryStore;
//! use notp_sync::{
//!     duplex, new_follower_state_machine, new_leader_state_machine, OperationType,
//!     ReceivePolicy, SyncConfig,
//! };
//!
//! async fn example() -> notp_sync::Result<()> {
//!     let (a, b) = duplex(ReceivePolicy::Forever);
//!     let config = SyncConfig::default();
//!
//!     let leader = new_leader_state_machine(
//!         OperationType::Push,
//!         Arc::new(MemoryStore::new()),
//!         a.build()?,
//!         config.clone(),
//!     )?;
//!     let follower = new_follower_state_machine(
//!         OperationType::Push,
//!         Arc::new(MemoryStore::new()),
//!         b.build()?,
//!         config,
//!     )?;
//!
//!     let (leader, follower) = tokio::join!(leader.run(), follower.run());
//!     println!("pushed {} commits", follower?.report().commits.len());
//!     leader?;
//!     Ok(())
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Follower                                   Leader
//!   |-------- Advertise (refs) --------------->|
//!   |<------- Advertise (refs) ----------------|
//!   |-------- NegotiationRequest (have/want) ->|   receiver of objects asks
//!   |<------- NegotiationResponse (commits) ---|   sender of objects plans
//!   |-------- Objects ... ObjectExchangeEnd -->|   sender streams objects
//!   |<------- Ack (new head) ------------------|   receiver advances its ref
//! ```
//!
//! The arrows of the last four messages reverse on `pull`. Either side may
//! answer any message with `Reject`.

pub mod convergence;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod statemachine;
pub mod transport;

pub use convergence::{compute_ref_digest, stores_converged, verify_convergence, ConvergenceResult};
pub use error::{Result, SyncError};
pub use messages::{
    limits, stream_types, NotpMessage, OperationType, ProtocolPhase, RefAdvertisement,
    PROTOCOL_VERSION,
};
pub use protocol::{
    new_follower_state_machine, new_leader_state_machine, state_machine_for, Role,
    SessionContext, SyncConfig, SyncReport, SyncState, SyncStateMachine,
};
pub use statemachine::{CancellationFlag, RuntimeContext, State, StateMachine, Transition};
pub use transport::memory::{duplex, InMemoryStream, ReceivePolicy};
pub use transport::{
    PacketHandler, PacketInspector, PacketLogger, PacketReceiver, PacketSender, TracingInspector,
    Transport, TransportBuilder,
};
