//! NOTP leader and follower roles.
//!
//! Both roles run the same state chain:
//!
//! ```text
//! [push] AdvertiseRequiredObjects -> Negotiating -> ObjectExchange -> Final
//! [pull] AdvertiseLatestObjects   -> Negotiating -> ObjectExchange -> Final
//! ```
//!
//! What a role does inside a state depends on whether it sends or receives
//! objects. The follower sends on push, the leader sends on pull.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notp_core::{Object, Oid};
use notp_store::{InsertResult, ObjectStore, StoreError, StoreExt};

use crate::error::{Result, SyncError};
use crate::messages::{limits, NotpMessage, OperationType, RefAdvertisement, PROTOCOL_VERSION};
use crate::statemachine::{RuntimeContext, State, StateMachine, Transition};
use crate::transport::Transport;

/// Which end of the session this machine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Waits for the follower and answers it.
    Leader,
    /// Opens the session.
    Follower,
}

impl Role {
    /// Whether this role transfers objects for `op`.
    pub fn sends_objects(self, op: OperationType) -> bool {
        matches!(
            (self, op),
            (Role::Follower, OperationType::Push) | (Role::Leader, OperationType::Pull)
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Leader => "leader",
            Role::Follower => "follower",
        })
    }
}

/// Configuration for sync behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Version written to and expected in every protocol segment.
    pub protocol_version: i16,
    /// Ref that is advertised and advanced.
    pub ref_name: String,
    /// Timeout for waiting for peer packets.
    pub receive_timeout: Duration,
    /// Maximum objects in one exchange packet.
    pub max_objects_per_packet: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            ref_name: "refs/heads/main".to_string(),
            receive_timeout: Duration::from_secs(30),
            max_objects_per_packet: 64,
        }
    }
}

impl SyncConfig {
    pub fn with_protocol_version(mut self, version: i16) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_ref_name(mut self, ref_name: impl Into<String>) -> Self {
        self.ref_name = ref_name.into();
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_max_objects_per_packet(mut self, max: usize) -> Self {
        self.max_objects_per_packet = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ref_name.is_empty() || self.ref_name.len() > limits::MAX_REF_NAME_LEN {
            return Err(SyncError::InvalidConfig(format!(
                "ref name must be 1..={} bytes",
                limits::MAX_REF_NAME_LEN
            )));
        }
        if self.max_objects_per_packet == 0
            || self.max_objects_per_packet > limits::MAX_OBJECTS_PER_PACKET
        {
            return Err(SyncError::InvalidConfig(format!(
                "max_objects_per_packet must be 1..={}",
                limits::MAX_OBJECTS_PER_PACKET
            )));
        }
        if self.receive_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("receive timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Result of a sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub role: Role,
    pub operation: OperationType,
    pub ref_name: String,
    /// Local ref value when the session started.
    pub local_head_before: Oid,
    /// Local ref value when the session ended.
    pub local_head_after: Oid,
    /// Ref value advertised by the peer.
    pub remote_head: Oid,
    /// Commits transferred, oldest first.
    pub commits: Vec<Oid>,
    /// Number of objects sent to peer.
    pub objects_sent: usize,
    /// Number of new objects received from peer.
    pub objects_received: usize,
    /// Number of received objects that were already stored.
    pub duplicate_objects: usize,
    /// Whether there was nothing to transfer.
    pub up_to_date: bool,
}

impl SyncReport {
    fn new(role: Role, operation: OperationType, ref_name: &str) -> Self {
        Self {
            role,
            operation,
            ref_name: ref_name.to_string(),
            local_head_before: Oid::ZERO,
            local_head_after: Oid::ZERO,
            remote_head: Oid::ZERO,
            commits: Vec::new(),
            objects_sent: 0,
            objects_received: 0,
            duplicate_objects: 0,
            up_to_date: false,
        }
    }
}

/// Per-session data shared by the protocol states.
pub struct SessionContext<S: ?Sized> {
    role: Role,
    operation: OperationType,
    store: Arc<S>,
    config: SyncConfig,
    local_head: Oid,
    remote_head: Oid,
    have: Oid,
    want: Oid,
    plan: Vec<Oid>,
    report: SyncReport,
}

impl<S: ?Sized> SessionContext<S> {
    pub fn new(role: Role, operation: OperationType, store: Arc<S>, config: SyncConfig) -> Self {
        let report = SyncReport::new(role, operation, &config.ref_name);
        Self {
            role,
            operation,
            store,
            config,
            local_head: Oid::ZERO,
            remote_head: Oid::ZERO,
            have: Oid::ZERO,
            want: Oid::ZERO,
            plan: Vec::new(),
            report,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn operation(&self) -> OperationType {
        self.operation
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn report(&self) -> &SyncReport {
        &self.report
    }

    pub fn into_report(self) -> SyncReport {
        self.report
    }

    fn sends_objects(&self) -> bool {
        self.role.sends_objects(self.operation)
    }
}

impl<S: ?Sized> fmt::Debug for SessionContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("role", &self.role)
            .field("operation", &self.operation)
            .field("local_head", &self.local_head)
            .field("remote_head", &self.remote_head)
            .field("have", &self.have)
            .field("want", &self.want)
            .finish_non_exhaustive()
    }
}

/// Protocol states shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    AdvertiseRequiredObjects,
    AdvertiseLatestObjects,
    Negotiating,
    ObjectExchange,
}

impl SyncState {
    /// First state for `op`.
    pub fn initial(op: OperationType) -> Self {
        match op {
            OperationType::Push => SyncState::AdvertiseRequiredObjects,
            OperationType::Pull => SyncState::AdvertiseLatestObjects,
        }
    }

    /// State after this one, `None` meaning final.
    pub fn successor(self) -> Option<SyncState> {
        match self {
            SyncState::AdvertiseRequiredObjects | SyncState::AdvertiseLatestObjects => {
                Some(SyncState::Negotiating)
            }
            SyncState::Negotiating => Some(SyncState::ObjectExchange),
            SyncState::ObjectExchange => None,
        }
    }
}

#[async_trait]
impl<S> State<SessionContext<S>> for SyncState
where
    S: ObjectStore + ?Sized + 'static,
{
    fn name(&self) -> &'static str {
        match self {
            SyncState::AdvertiseRequiredObjects => "advertise-required-objects",
            SyncState::AdvertiseLatestObjects => "advertise-latest-objects",
            SyncState::Negotiating => "negotiating",
            SyncState::ObjectExchange => "object-exchange",
        }
    }

    async fn transition(
        self,
        runtime: &mut RuntimeContext<SessionContext<S>>,
    ) -> Result<Transition<Self>> {
        match self {
            SyncState::AdvertiseRequiredObjects | SyncState::AdvertiseLatestObjects => {
                advertise(runtime).await?
            }
            SyncState::Negotiating if runtime.data().sends_objects() => {
                negotiate_as_sender(runtime).await?
            }
            SyncState::Negotiating => negotiate_as_receiver(runtime).await?,
            SyncState::ObjectExchange if runtime.data().sends_objects() => {
                exchange_as_sender(runtime).await?
            }
            SyncState::ObjectExchange => exchange_as_receiver(runtime).await?,
        }

        match self.successor() {
            Some(next) => Ok(Transition::Next(next)),
            None => {
                let report = &runtime.data().report;
                tracing::info!(
                    role = %report.role,
                    operation = %report.operation,
                    commits = report.commits.len(),
                    sent = report.objects_sent,
                    received = report.objects_received,
                    duplicates = report.duplicate_objects,
                    head = %report.local_head_after,
                    "sync complete"
                );
                Ok(Transition::Final)
            }
        }
    }
}

/// A machine running one side of a NOTP session.
pub type SyncStateMachine<S> = StateMachine<SyncState, SessionContext<S>>;

/// Build the leader side of a session.
pub fn new_leader_state_machine<S>(
    op: OperationType,
    store: Arc<S>,
    transport: Transport,
    config: SyncConfig,
) -> Result<SyncStateMachine<S>>
where
    S: ObjectStore + ?Sized + 'static,
{
    new_state_machine(Role::Leader, op, store, transport, config)
}

/// Build the follower side of a session.
pub fn new_follower_state_machine<S>(
    op: OperationType,
    store: Arc<S>,
    transport: Transport,
    config: SyncConfig,
) -> Result<SyncStateMachine<S>>
where
    S: ObjectStore + ?Sized + 'static,
{
    new_state_machine(Role::Follower, op, store, transport, config)
}

/// Build either side, parsing the operation name first.
///
/// An unknown operation fails before anything is sent.
pub fn state_machine_for<S>(
    role: Role,
    operation: &str,
    store: Arc<S>,
    transport: Transport,
    config: SyncConfig,
) -> Result<SyncStateMachine<S>>
where
    S: ObjectStore + ?Sized + 'static,
{
    let op: OperationType = operation.parse()?;
    new_state_machine(role, op, store, transport, config)
}

fn new_state_machine<S>(
    role: Role,
    op: OperationType,
    store: Arc<S>,
    transport: Transport,
    config: SyncConfig,
) -> Result<SyncStateMachine<S>>
where
    S: ObjectStore + ?Sized + 'static,
{
    config.validate()?;
    let timeout = config.receive_timeout;
    let session = SessionContext::new(role, op, store, config);
    Ok(StateMachine::new(SyncState::initial(op), transport, session).with_receive_timeout(timeout))
}

// ─────────────────────────────────────────────────────────────────────────────
// Messaging helpers
// ─────────────────────────────────────────────────────────────────────────────

type Runtime<S> = RuntimeContext<SessionContext<S>>;

async fn send_message<S: ?Sized>(runtime: &Runtime<S>, message: &NotpMessage) -> Result<()> {
    let session = runtime.data();
    let packet = message.encode(session.config.protocol_version, session.operation)?;
    tracing::trace!(role = %session.role, kind = message.kind(), bytes = packet.len(), "sending");
    runtime.transmit_packet(packet).await
}

/// Receive, decode and check the next message against the session.
///
/// A `Reject` from the peer surfaces as [`SyncError::Rejected`].
async fn receive_message<S: ?Sized>(runtime: &Runtime<S>) -> Result<NotpMessage> {
    let packet = runtime.receive_packet().await?;
    let (header, message) = NotpMessage::decode(&packet)?;
    let session = runtime.data();

    if let NotpMessage::Reject { reason } = message {
        tracing::warn!(role = %session.role, %reason, "peer rejected session");
        return Err(SyncError::Rejected(reason));
    }
    if header.version != session.config.protocol_version {
        let error = SyncError::VersionMismatch {
            local: session.config.protocol_version,
            peer: header.version,
        };
        return Err(reject(runtime, error).await);
    }
    if header.operation != session.operation.as_i16() {
        let error = SyncError::OperationMismatch {
            expected: session.operation.as_i16(),
            got: header.operation,
        };
        return Err(reject(runtime, error).await);
    }
    let expected_phase = message.phase(session.operation);
    if header.phase != expected_phase.as_i16() {
        let error = SyncError::UnexpectedPhase {
            expected: expected_phase.to_string(),
            got: header.phase.to_string(),
        };
        return Err(reject(runtime, error).await);
    }
    Ok(message)
}

/// Tell the peer why the session stops, then hand the error back.
async fn reject<S: ?Sized>(runtime: &Runtime<S>, error: SyncError) -> SyncError {
    let session = runtime.data();
    let mut reason = error.to_string();
    if reason.len() > limits::MAX_REASON_LEN {
        let mut end = limits::MAX_REASON_LEN;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    tracing::warn!(role = %session.role, %reason, "rejecting session");

    let message = NotpMessage::Reject { reason };
    match message.encode(session.config.protocol_version, session.operation) {
        Ok(packet) => {
            if let Err(e) = runtime.transmit_packet(packet).await {
                tracing::warn!(error = %e, "failed to send reject");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to encode reject"),
    }
    error
}

fn unexpected(expected: &str, got: &NotpMessage) -> SyncError {
    SyncError::UnexpectedPhase {
        expected: expected.to_string(),
        got: got.kind().to_string(),
    }
}

fn advertised_head(message: &NotpMessage, ref_name: &str) -> Result<Oid> {
    match message {
        NotpMessage::Advertise { refs } => Ok(refs
            .iter()
            .find(|r| r.name == ref_name)
            .map(|r| r.oid)
            .unwrap_or(Oid::ZERO)),
        other => Err(unexpected("advertise", other)),
    }
}

fn missing_objects(error: StoreError) -> SyncError {
    match error {
        StoreError::NotFound(oid) => SyncError::MissingObjects(oid.to_hex()),
        other => other.into(),
    }
}

/// Whether `target` is `head` or one of its ancestors.
async fn history_contains<S>(store: &S, head: Oid, target: Oid) -> Result<bool>
where
    S: ObjectStore + ?Sized,
{
    if target.is_zero() || head == target {
        return Ok(true);
    }
    if head.is_zero() || !store.has_object(&target).await? {
        return Ok(false);
    }
    Ok(store.commit_history(head, target, false).await?.matched)
}

// ─────────────────────────────────────────────────────────────────────────────
// Advertise
// ─────────────────────────────────────────────────────────────────────────────

async fn advertise<S>(runtime: &mut Runtime<S>) -> Result<()>
where
    S: ObjectStore + ?Sized,
{
    let store = runtime.data().store.clone();
    let ref_name = runtime.data().config.ref_name.clone();
    let local_head = store.head(&ref_name).await?;
    {
        let session = runtime.data_mut();
        session.local_head = local_head;
        session.report.local_head_before = local_head;
        session.report.local_head_after = local_head;
    }

    let ours = NotpMessage::Advertise {
        refs: vec![RefAdvertisement::new(ref_name.clone(), local_head)],
    };

    let remote_head = match runtime.data().role {
        Role::Follower => {
            send_message(runtime, &ours).await?;
            let theirs = receive_message(runtime).await?;
            advertised_head(&theirs, &ref_name)?
        }
        Role::Leader => {
            let theirs = receive_message(runtime).await?;
            let remote_head = match advertised_head(&theirs, &ref_name) {
                Ok(oid) => oid,
                Err(e) => return Err(reject(runtime, e).await),
            };
            send_message(runtime, &ours).await?;
            remote_head
        }
    };

    tracing::debug!(local = %local_head, remote = %remote_head, "refs advertised");
    let session = runtime.data_mut();
    session.remote_head = remote_head;
    session.report.remote_head = remote_head;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Negotiate
// ─────────────────────────────────────────────────────────────────────────────

async fn negotiate_as_receiver<S>(runtime: &mut Runtime<S>) -> Result<()>
where
    S: ObjectStore + ?Sized,
{
    let store = runtime.data().store.clone();
    let local_head = runtime.data().local_head;
    let remote_head = runtime.data().remote_head;

    let have = local_head;
    let want = if history_contains(&*store, local_head, remote_head).await? {
        Oid::ZERO
    } else {
        remote_head
    };
    tracing::debug!(%have, %want, "negotiating as receiver");

    send_message(runtime, &NotpMessage::NegotiationRequest { have, want }).await?;
    let commits = match receive_message(runtime).await? {
        NotpMessage::NegotiationResponse { commits } => commits,
        other => return Err(reject(runtime, unexpected("negotiation-response", &other)).await),
    };

    let consistent = if want.is_zero() {
        commits.is_empty()
    } else {
        commits.last() == Some(&want)
    };
    if !consistent {
        let error = SyncError::InvalidMessage(format!(
            "commit plan of {} entries does not end at {}",
            commits.len(),
            want
        ));
        return Err(reject(runtime, error).await);
    }

    let session = runtime.data_mut();
    session.have = have;
    session.want = want;
    session.report.commits = commits.clone();
    session.report.up_to_date = commits.is_empty();
    session.plan = commits;
    Ok(())
}

async fn negotiate_as_sender<S>(runtime: &mut Runtime<S>) -> Result<()>
where
    S: ObjectStore + ?Sized,
{
    let store = runtime.data().store.clone();
    let local_head = runtime.data().local_head;

    let (have, want) = match receive_message(runtime).await? {
        NotpMessage::NegotiationRequest { have, want } => (have, want),
        other => return Err(reject(runtime, unexpected("negotiation-request", &other)).await),
    };
    tracing::debug!(%have, %want, "negotiating as sender");

    let plan = if want.is_zero() {
        Vec::new()
    } else {
        if want != local_head {
            let error = SyncError::InvalidMessage(format!(
                "peer wants {} but advertised head is {}",
                want, local_head
            ));
            return Err(reject(runtime, error).await);
        }
        let history = match store.commit_history(want, have, true).await {
            Ok(history) => history,
            Err(e) => return Err(reject(runtime, e.into()).await),
        };
        if !history.matched {
            let error = SyncError::NonFastForward {
                base: have,
                head: want,
            };
            return Err(reject(runtime, error).await);
        }
        let plan: Vec<Oid> = history.oids().filter(|oid| *oid != have).collect();
        if plan.len() > limits::MAX_COMMITS {
            let error = SyncError::InvalidMessage(format!("{} commits to transfer", plan.len()));
            return Err(reject(runtime, error).await);
        }
        plan
    };

    send_message(
        runtime,
        &NotpMessage::NegotiationResponse {
            commits: plan.clone(),
        },
    )
    .await?;

    let session = runtime.data_mut();
    session.have = have;
    session.want = want;
    session.report.commits = plan.clone();
    session.report.up_to_date = plan.is_empty();
    session.plan = plan;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Exchange
// ─────────────────────────────────────────────────────────────────────────────

async fn exchange_as_sender<S>(runtime: &mut Runtime<S>) -> Result<()>
where
    S: ObjectStore + ?Sized,
{
    let store = runtime.data().store.clone();
    let have = runtime.data().have;
    let want = runtime.data().want;
    let plan = runtime.data().plan.clone();
    let batch = runtime.data().config.max_objects_per_packet;

    let mut objects = store.reachable_objects(&plan).await?;
    if !have.is_zero() && !objects.is_empty() {
        // The peer already holds everything reachable from its head.
        let known: HashSet<Oid> = store
            .reachable_objects(&[have])
            .await?
            .iter()
            .map(Object::oid)
            .collect();
        objects.retain(|object| !known.contains(&object.oid()));
    }

    let mut batches = objects.chunks(batch).peekable();
    if batches.peek().is_none() {
        send_message(
            runtime,
            &NotpMessage::Objects {
                objects: Vec::new(),
                last: true,
            },
        )
        .await?;
    }
    while let Some(chunk) = batches.next() {
        let message = NotpMessage::Objects {
            objects: chunk.to_vec(),
            last: batches.peek().is_none(),
        };
        send_message(runtime, &message).await?;
    }
    tracing::debug!(objects = objects.len(), commits = plan.len(), "objects sent");
    runtime.data_mut().report.objects_sent = objects.len();

    let acked = match receive_message(runtime).await? {
        NotpMessage::Ack { head } => head,
        other => return Err(unexpected("ack", &other)),
    };
    let expected = if want.is_zero() { have } else { want };
    let ref_name = &runtime.data().config.ref_name;
    if acked.name != *ref_name || acked.oid != expected {
        return Err(SyncError::InvalidMessage(format!(
            "peer acknowledged {} at {}, expected {} at {}",
            acked.name, acked.oid, ref_name, expected
        )));
    }
    Ok(())
}

async fn exchange_as_receiver<S>(runtime: &mut Runtime<S>) -> Result<()>
where
    S: ObjectStore + ?Sized,
{
    let store = runtime.data().store.clone();
    let ref_name = runtime.data().config.ref_name.clone();
    let have = runtime.data().have;
    let want = runtime.data().want;
    let plan = runtime.data().plan.clone();

    let mut received = 0;
    let mut duplicates = 0;
    loop {
        let (objects, last) = match receive_message(runtime).await? {
            NotpMessage::Objects { objects, last } => (objects, last),
            other => return Err(reject(runtime, unexpected("objects", &other)).await),
        };
        for object in &objects {
            match store.insert_object(object).await? {
                InsertResult::Inserted => received += 1,
                InsertResult::AlreadyExists => duplicates += 1,
            }
        }
        if last {
            break;
        }
    }
    {
        let report = &mut runtime.data_mut().report;
        report.objects_received = received;
        report.duplicate_objects = duplicates;
    }
    tracing::debug!(received, duplicates, "objects received");

    let new_head = if want.is_zero() {
        have
    } else {
        if let Err(e) = verify_received(&*store, have, want, &plan).await {
            return Err(reject(runtime, e).await);
        }
        if !store.compare_and_set_ref(&ref_name, have, want).await? {
            let error = SyncError::RefConflict {
                name: ref_name,
                expected: have,
            };
            return Err(reject(runtime, error).await);
        }
        want
    };

    send_message(
        runtime,
        &NotpMessage::Ack {
            head: RefAdvertisement::new(ref_name, new_head),
        },
    )
    .await?;
    runtime.data_mut().report.local_head_after = new_head;
    Ok(())
}

/// Check that `want` now extends `have` and every planned commit is complete.
async fn verify_received<S>(store: &S, have: Oid, want: Oid, plan: &[Oid]) -> Result<()>
where
    S: ObjectStore + ?Sized,
{
    let history = store
        .commit_history(want, have, false)
        .await
        .map_err(missing_objects)?;
    if !history.matched {
        return Err(SyncError::NonFastForward {
            base: have,
            head: want,
        });
    }
    store
        .reachable_objects(plan)
        .await
        .map_err(missing_objects)?;
    Ok(())
}
