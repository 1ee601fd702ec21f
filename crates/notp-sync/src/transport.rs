//! Transport abstraction for the NOTP state machines.
//!
//! A [`Transport`] pairs a [`PacketSender`] with a [`PacketReceiver`] and
//! fans every delivered packet out to its [`PacketInspector`]s. Inspectors
//! run after a successful send or receive and cannot veto delivery.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use notp_core::{Packet, PacketReader};

use crate::error::{Result, SyncError};

/// Outbound half of a channel.
#[async_trait]
pub trait PacketSender: Send + Sync {
    async fn send(&self, packet: Packet) -> Result<()>;
}

/// Inbound half of a channel.
///
/// `receive` suspends or fails according to the implementation's wait policy.
#[async_trait]
pub trait PacketReceiver: Send + Sync {
    async fn receive(&self) -> Result<Packet>;
}

/// Side-effecting hook on delivered packets.
pub trait PacketInspector: Send + Sync {
    fn on_sent(&self, packet: &Packet);
    fn on_received(&self, packet: &Packet);
}

/// A fully wired channel.
#[derive(Clone)]
pub struct Transport {
    sender: Arc<dyn PacketSender>,
    receiver: Arc<dyn PacketReceiver>,
    inspectors: Vec<Arc<dyn PacketInspector>>,
}

impl Transport {
    pub fn builder() -> TransportBuilder {
        TransportBuilder::default()
    }

    pub async fn send(&self, packet: Packet) -> Result<()> {
        self.sender.send(packet.clone()).await?;
        for inspector in &self.inspectors {
            inspector.on_sent(&packet);
        }
        Ok(())
    }

    pub async fn receive(&self) -> Result<Packet> {
        let packet = self.receiver.receive().await?;
        for inspector in &self.inspectors {
            inspector.on_received(&packet);
        }
        Ok(packet)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("inspectors", &self.inspectors.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Transport`]. Both halves are required.
#[derive(Default)]
pub struct TransportBuilder {
    sender: Option<Arc<dyn PacketSender>>,
    receiver: Option<Arc<dyn PacketReceiver>>,
    inspectors: Vec<Arc<dyn PacketInspector>>,
}

impl TransportBuilder {
    pub fn sender(mut self, sender: impl PacketSender + 'static) -> Self {
        self.sender = Some(Arc::new(sender));
        self
    }

    pub fn receiver(mut self, receiver: impl PacketReceiver + 'static) -> Self {
        self.receiver = Some(Arc::new(receiver));
        self
    }

    pub fn inspector(mut self, inspector: impl PacketInspector + 'static) -> Self {
        self.inspectors.push(Arc::new(inspector));
        self
    }

    /// Share an inspector that the caller keeps a handle to.
    pub fn shared_inspector(mut self, inspector: Arc<dyn PacketInspector>) -> Self {
        self.inspectors.push(inspector);
        self
    }

    pub fn build(self) -> Result<Transport> {
        Ok(Transport {
            sender: self.sender.ok_or(SyncError::MissingSender)?,
            receiver: self.receiver.ok_or(SyncError::MissingReceiver)?,
            inspectors: self.inspectors,
        })
    }
}

/// Callback invoked with a delivered packet.
pub type PacketHandler = Box<dyn Fn(&Packet) + Send + Sync>;

/// Inspector built from optional callbacks.
pub struct PacketLogger {
    on_sent: Option<PacketHandler>,
    on_received: Option<PacketHandler>,
}

impl PacketLogger {
    /// At least one handler is required.
    pub fn new(on_sent: Option<PacketHandler>, on_received: Option<PacketHandler>) -> Result<Self> {
        if on_sent.is_none() && on_received.is_none() {
            return Err(SyncError::InvalidConfig(
                "packet logger needs a sent or received handler".into(),
            ));
        }
        Ok(Self {
            on_sent,
            on_received,
        })
    }
}

impl PacketInspector for PacketLogger {
    fn on_sent(&self, packet: &Packet) {
        if let Some(handler) = &self.on_sent {
            handler(packet);
        }
    }

    fn on_received(&self, packet: &Packet) {
        if let Some(handler) = &self.on_received {
            handler(packet);
        }
    }
}

/// Logs every packet through `tracing`.
#[derive(Debug, Clone)]
pub struct TracingInspector {
    label: String,
}

impl TracingInspector {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

fn peek_phase(packet: &Packet) -> Option<i16> {
    PacketReader::new(packet).read_protocol().ok().map(|h| h.phase)
}

impl PacketInspector for TracingInspector {
    fn on_sent(&self, packet: &Packet) {
        tracing::debug!(
            peer = %self.label,
            bytes = packet.len(),
            phase = ?peek_phase(packet),
            "packet sent"
        );
    }

    fn on_received(&self, packet: &Packet) {
        tracing::debug!(
            peer = %self.label,
            bytes = packet.len(),
            phase = ?peek_phase(packet),
            "packet received"
        );
    }
}

/// In-memory FIFO streams for tests and in-process peers.
pub mod memory {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{mpsc, Mutex};

    /// What `receive` does on an empty queue.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum ReceivePolicy {
        /// Fail with `NoPacketsAvailable`.
        #[default]
        Immediate,
        /// Wait up to the given duration, then fail with `NoPacketsAvailable`.
        Wait(Duration),
        /// Wait until a packet arrives.
        Forever,
    }

    /// A FIFO packet queue. Clones share the same queue.
    #[derive(Clone)]
    pub struct InMemoryStream {
        tx: mpsc::UnboundedSender<Packet>,
        rx: Arc<Mutex<mpsc::UnboundedReceiver<Packet>>>,
        policy: ReceivePolicy,
    }

    impl InMemoryStream {
        pub fn new() -> Self {
            Self::with_policy(ReceivePolicy::Immediate)
        }

        pub fn with_policy(policy: ReceivePolicy) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                tx,
                rx: Arc::new(Mutex::new(rx)),
                policy,
            }
        }

        pub fn policy(&self) -> ReceivePolicy {
            self.policy
        }
    }

    impl Default for InMemoryStream {
        fn default() -> Self {
            Self::new()
        }
    }

    impl fmt::Debug for InMemoryStream {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("InMemoryStream")
                .field("policy", &self.policy)
                .finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl PacketSender for InMemoryStream {
        async fn send(&self, packet: Packet) -> Result<()> {
            self.tx
                .send(packet)
                .map_err(|_| SyncError::SendFailed("stream closed".into()))
        }
    }

    #[async_trait]
    impl PacketReceiver for InMemoryStream {
        async fn receive(&self) -> Result<Packet> {
            let mut rx = self.rx.lock().await;
            match self.policy {
                ReceivePolicy::Immediate => {
                    rx.try_recv().map_err(|_| SyncError::NoPacketsAvailable)
                }
                ReceivePolicy::Wait(wait) => match tokio::time::timeout(wait, rx.recv()).await {
                    Ok(Some(packet)) => Ok(packet),
                    Ok(None) => Err(SyncError::TransportError("stream closed".into())),
                    Err(_) => Err(SyncError::NoPacketsAvailable),
                },
                ReceivePolicy::Forever => rx
                    .recv()
                    .await
                    .ok_or_else(|| SyncError::TransportError("stream closed".into())),
            }
        }
    }

    /// Two cross-wired transports: what one sends, the other receives.
    pub fn duplex(policy: ReceivePolicy) -> (TransportBuilder, TransportBuilder) {
        let a_to_b = InMemoryStream::with_policy(policy);
        let b_to_a = InMemoryStream::with_policy(policy);
        let a = Transport::builder()
            .sender(a_to_b.clone())
            .receiver(b_to_a.clone());
        let b = Transport::builder().sender(b_to_a).receiver(a_to_b);
        (a, b)
    }
}
