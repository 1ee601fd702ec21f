//! Generic state machine engine.
//!
//! A machine owns its current [`State`] and a [`RuntimeContext`]. Each call
//! to [`State::transition`] consumes the state and returns either the next
//! state or [`Transition::Final`]. The run loop carries no protocol
//! knowledge: it stops on the first error, on `Final`, or when its
//! [`CancellationFlag`] is raised between two transitions.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notp_core::Packet;

use crate::error::{Result, SyncError};
use crate::transport::Transport;

/// Outcome of one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<S> {
    /// Continue with this state.
    Next(S),
    /// Stop successfully.
    Final,
}

/// A state of a machine whose shared data is `C`.
#[async_trait]
pub trait State<C: Send>: Sized + Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    async fn transition(self, runtime: &mut RuntimeContext<C>) -> Result<Transition<Self>>;
}

/// Shared context handed to every transition.
pub struct RuntimeContext<C> {
    transport: Transport,
    receive_timeout: Option<Duration>,
    data: C,
}

impl<C> RuntimeContext<C> {
    pub fn new(transport: Transport, data: C) -> Self {
        Self {
            transport,
            receive_timeout: None,
            data,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn data(&self) -> &C {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut C {
        &mut self.data
    }

    pub fn into_data(self) -> C {
        self.data
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout
    }

    /// Send a packet to the peer.
    pub fn transmit_packet(
        &self,
        packet: Packet,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let transport = self.transport.clone();
        async move { transport.send(packet).await }
    }

    /// Wait for the next packet from the peer, bounded by the receive timeout.
    pub fn receive_packet(&self) -> impl Future<Output = Result<Packet>> + Send + 'static {
        let transport = self.transport.clone();
        let timeout = self.receive_timeout;
        async move {
            match timeout {
                None => transport.receive().await,
                Some(limit) => tokio::time::timeout(limit, transport.receive())
                    .await
                    .map_err(|_| SyncError::Timeout(limit))?,
            }
        }
    }
}

/// Cooperative cancellation shared between a machine and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs a chain of states to completion.
pub struct StateMachine<S, C> {
    state: S,
    runtime: RuntimeContext<C>,
    cancellation: CancellationFlag,
}

impl<S, C> StateMachine<S, C>
where
    S: State<C>,
    C: Send,
{
    pub fn new(initial: S, transport: Transport, data: C) -> Self {
        Self {
            state: initial,
            runtime: RuntimeContext::new(transport, data),
            cancellation: CancellationFlag::new(),
        }
    }

    /// Bound every `receive_packet` by `timeout`.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.runtime.receive_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    /// Handle that cancels this machine.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancellation.clone()
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn data(&self) -> &C {
        self.runtime.data()
    }

    /// Run until a final transition, returning the shared data.
    ///
    /// The first error stops the machine and is returned unchanged.
    pub async fn run(self) -> Result<C> {
        let StateMachine {
            mut state,
            mut runtime,
            cancellation,
        } = self;

        loop {
            if cancellation.is_cancelled() {
                tracing::debug!(state = state.name(), "state machine cancelled");
                return Err(SyncError::Cancelled);
            }

            let from = state.name();
            match state.transition(&mut runtime).await {
                Ok(Transition::Next(next)) => {
                    tracing::debug!(from, to = next.name(), "state transition");
                    state = next;
                }
                Ok(Transition::Final) => {
                    tracing::debug!(from, "state machine finished");
                    return Ok(runtime.into_data());
                }
                Err(e) => {
                    tracing::debug!(state = from, error = %e, "state machine failed");
                    return Err(e);
                }
            }
        }
    }
}
