//! Inbound connection multiplexer.
//!
//! # Data Flow
//! ```text
//! start_receiving()  → bind listener (once), return InboundMessages
//! first subscribe()  → spawn accept loop
//! accept loop        → one accept at a time
//!     → per connection: security → protocol decode → hub.publish
//! dispose()          → stop accept loop, release port, end subscriptions
//! ```
//!
//! # Failure Policy
//! A failed or stalled security handshake and a connection that stays silent
//! past the receive timeout only close that connection.
//!
//! By default an accept error or a decode error ends the shared sequence for
//! every subscriber and stops the accept loop. With
//! [`FailurePolicy::IsolateConnection`] a decode error is only logged and the
//! connection closed; accept errors still end the sequence.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{ProtocolError, TransportError, TransportResult};
use crate::lifecycle::{Shutdown, ShutdownListener};
use crate::net::connection::{ConnectionGuard, ConnectionTracker, Direction};
use crate::net::destination::Destination;
use crate::net::hub::{Hub, InboundMessages};
use crate::observability::metrics;
use crate::protocol::ReceivingProtocol;
use crate::security::{NoSecurity, StreamSecurity};

/// How long an accepted connection may stay silent by default.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// What a failed inbound connection does to the shared sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any connection failure ends the sequence for all subscribers.
    #[default]
    #[serde(alias = "terminate")]
    TerminateAll,
    /// A connection failure closes only that connection.
    #[serde(alias = "isolate")]
    IsolateConnection,
}

enum ReceiverState {
    NotStarted,
    Listening {
        messages: InboundMessages,
        local_addr: SocketAddr,
    },
    Stopped,
}

/// Accepts TCP connections and exposes their decoded messages as one
/// shared sequence.
pub struct Receiver {
    endpoint: SocketAddr,
    protocol: Arc<dyn ReceivingProtocol>,
    security: Arc<dyn StreamSecurity>,
    failure_policy: FailurePolicy,
    timeout: Duration,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    state: Mutex<ReceiverState>,
}

impl Receiver {
    /// Create a receiver for `endpoint`. Nothing is bound until
    /// [`start_receiving`](Self::start_receiving).
    pub fn new(endpoint: SocketAddr, protocol: Arc<dyn ReceivingProtocol>) -> Self {
        Self {
            endpoint,
            protocol,
            security: Arc::new(NoSecurity),
            failure_policy: FailurePolicy::default(),
            timeout: DEFAULT_RECEIVE_TIMEOUT,
            tracker: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
            state: Mutex::new(ReceiverState::NotStarted),
        }
    }

    /// Transform applied to every accepted stream before decoding.
    pub fn with_security(mut self, security: Arc<dyn StreamSecurity>) -> Self {
        self.security = security;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Longest a connection may take to finish its security handshake, or
    /// to deliver its next frame, before it is dropped.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share open-connection accounting with the caller.
    pub fn with_tracker(mut self, tracker: ConnectionTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// The bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().expect("receiver mutex poisoned") {
            ReceiverState::Listening { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Bind the listener and return the shared inbound sequence.
    ///
    /// The first call binds; every later call returns the same sequence
    /// without binding again. Must be called from within a Tokio runtime.
    /// A failed bind leaves the receiver unstarted.
    pub fn start_receiving(&self) -> TransportResult<InboundMessages> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        match &*state {
            ReceiverState::Listening { messages, .. } => return Ok(messages.clone()),
            ReceiverState::Stopped => return Err(TransportError::Stopped),
            ReceiverState::NotStarted => {}
        }

        let bind_error = |source| TransportError::Bind {
            endpoint: self.endpoint,
            source,
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| bind_error(std::io::Error::other(e)))?;
        let listener = bind_listener(self.endpoint).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        tracing::info!(
            endpoint = %local_addr,
            failure_policy = ?self.failure_policy,
            "Receiver listening"
        );

        let context = Arc::new(ConnectionContext {
            protocol: Arc::clone(&self.protocol),
            security: Arc::clone(&self.security),
            failure_policy: self.failure_policy,
            timeout: self.timeout,
            tracker: self.tracker.clone(),
            local: Destination::from_socket_addr(local_addr),
            stop: self.shutdown.clone(),
        });
        let accept_loop = AcceptLoop {
            listener,
            context,
            shutdown: self.shutdown.subscribe(),
        };
        let hub = Hub::new(Box::new(move |hub| {
            runtime.spawn(accept_loop.run(hub));
        }));

        let messages = InboundMessages::new(hub);
        *state = ReceiverState::Listening {
            messages: messages.clone(),
            local_addr,
        };
        Ok(messages)
    }

    /// Stop listening. Idempotent.
    ///
    /// A pending accept is abandoned and the port released. Connections
    /// already being decoded run to completion; their messages are no longer
    /// delivered.
    pub fn dispose(&self) {
        let previous = {
            let mut state = self.state.lock().expect("receiver mutex poisoned");
            std::mem::replace(&mut *state, ReceiverState::Stopped)
        };

        match previous {
            ReceiverState::Stopped => return,
            ReceiverState::NotStarted => {}
            ReceiverState::Listening { messages, local_addr } => {
                messages.hub().close();
                tracing::info!(endpoint = %local_addr, "Receiver stopped");
            }
        }
        self.shutdown.trigger();
    }

    pub fn is_disposed(&self) -> bool {
        matches!(
            *self.state.lock().expect("receiver mutex poisoned"),
            ReceiverState::Stopped
        )
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("endpoint", &self.endpoint)
            .field("security", &self.security)
            .field("failure_policy", &self.failure_policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Bind synchronously so the receiver lock is never held across an await.
fn bind_listener(endpoint: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = std::net::TcpListener::bind(endpoint)?;
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

/// Everything a decode task needs, shared across connections.
struct ConnectionContext {
    protocol: Arc<dyn ReceivingProtocol>,
    security: Arc<dyn StreamSecurity>,
    failure_policy: FailurePolicy,
    timeout: Duration,
    tracker: ConnectionTracker,
    local: Destination,
    /// Stops the accept loop after a terminal failure.
    stop: Shutdown,
}

struct AcceptLoop {
    listener: TcpListener,
    context: Arc<ConnectionContext>,
    shutdown: ShutdownListener,
}

impl AcceptLoop {
    async fn run(mut self, hub: Arc<Hub>) {
        tracing::debug!(endpoint = %self.context.local, "Accept loop started");

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.wait() => break,
                res = self.listener.accept() => res,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let guard = self.context.tracker.track(Direction::Inbound);
                    tracing::debug!(
                        peer_addr = %peer_addr,
                        connection_id = %guard.id(),
                        "Connection established"
                    );
                    metrics::connection_accepted();
                    tokio::spawn(decode_connection(
                        stream,
                        peer_addr,
                        guard,
                        Arc::clone(&self.context),
                        Arc::clone(&hub),
                    ));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed, ending inbound sequence");
                    hub.fail(TransportError::Accept(e));
                    break;
                }
            }
        }

        // Dropping the listener here releases the port.
        tracing::debug!(endpoint = %self.context.local, "Accept loop stopped");
    }
}

enum Decoded {
    Completed,
    Idle,
    Failed(ProtocolError),
}

async fn decode_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    guard: ConnectionGuard,
    context: Arc<ConnectionContext>,
    hub: Arc<Hub>,
) {
    let connection_id = guard.id();
    let handshake = context.security.apply(&context.local, Box::new(stream));
    let secured = match tokio::time::timeout(context.timeout, handshake).await {
        Ok(Ok(secured)) => secured,
        Ok(Err(e)) => {
            tracing::warn!(
                peer_addr = %peer_addr,
                connection_id = %connection_id,
                error = %e,
                "Security handshake failed, dropping connection"
            );
            return;
        }
        Err(_) => {
            tracing::warn!(
                peer_addr = %peer_addr,
                connection_id = %connection_id,
                timeout_ms = context.timeout.as_millis() as u64,
                "Security handshake timed out, dropping connection"
            );
            return;
        }
    };

    let mut messages = context.protocol.receive_stream(secured);
    let decoded = loop {
        match tokio::time::timeout(context.timeout, messages.next()).await {
            Ok(Some(Ok(message))) => {
                metrics::message_received();
                hub.publish(message);
            }
            Ok(Some(Err(e))) => break Decoded::Failed(e),
            Ok(None) => break Decoded::Completed,
            Err(_) => break Decoded::Idle,
        }
    };
    // Closes the socket.
    drop(messages);
    drop(guard);

    match decoded {
        Decoded::Completed => {
            tracing::debug!(peer_addr = %peer_addr, connection_id = %connection_id, "Connection closed");
        }
        Decoded::Idle => {
            tracing::warn!(
                peer_addr = %peer_addr,
                connection_id = %connection_id,
                timeout_ms = context.timeout.as_millis() as u64,
                "Connection idle past receive timeout, dropping it"
            );
        }
        Decoded::Failed(e) => match context.failure_policy {
            FailurePolicy::TerminateAll => {
                tracing::error!(
                    peer_addr = %peer_addr,
                    connection_id = %connection_id,
                    error = %e,
                    "Connection failed, ending inbound sequence"
                );
                hub.fail(e.into());
                context.stop.trigger();
            }
            FailurePolicy::IsolateConnection => {
                tracing::warn!(
                    peer_addr = %peer_addr,
                    connection_id = %connection_id,
                    error = %e,
                    "Connection failed, dropping it"
                );
            }
        },
    }
}
