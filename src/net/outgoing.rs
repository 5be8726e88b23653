//! Outbound delivery of one batch of messages to one destination.
//!
//! # Lifecycle
//! ```text
//! new()     → Unconnected (messages copied in)
//! connect() → Connected   (loopback when the destination is this machine)
//! send()    → security transform → SendingProtocol writes frames in order
//! dispose() → Released    (socket closed once; later calls do nothing)
//! ```
//!
//! The batch owns its socket for its whole life. Access goes through
//! `&mut self`, so nothing else can read or write the socket meanwhile.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{TransportError, TransportResult};
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionGuard, ConnectionTracker, Direction};
use crate::net::destination::Destination;
use crate::net::local_host::{LocalHost, MachineHostName};
use crate::net::stream::BoxedStream;
use crate::observability::metrics;
use crate::protocol::{OutgoingMessage, SendingProtocol};
use crate::security::StreamSecurity;

#[derive(Debug)]
enum Connection {
    Unconnected,
    Connected {
        stream: TcpStream,
        guard: ConnectionGuard,
    },
    Released,
}

/// Messages bound for one destination, plus the connection that carries them.
pub struct OutgoingBatch {
    destination: Destination,
    messages: Vec<OutgoingMessage>,
    security: Arc<dyn StreamSecurity>,
    local_host: Arc<dyn LocalHost>,
    connect_timeout: Option<Duration>,
    tracker: ConnectionTracker,
    connection: Connection,
    cancel: Shutdown,
}

impl OutgoingBatch {
    /// Create an unconnected batch. `messages` are collected into the batch,
    /// so changes to the caller's collection afterwards have no effect.
    pub fn new(
        destination: Destination,
        messages: impl IntoIterator<Item = OutgoingMessage>,
        security: Arc<dyn StreamSecurity>,
    ) -> Self {
        Self {
            destination,
            messages: messages.into_iter().collect(),
            security,
            local_host: MachineHostName::shared(),
            connect_timeout: None,
            tracker: ConnectionTracker::new(),
            connection: Connection::Unconnected,
            cancel: Shutdown::new(),
        }
    }

    /// Replace the check that decides whether to connect over loopback.
    pub fn with_local_host(mut self, local_host: Arc<dyn LocalHost>) -> Self {
        self.local_host = local_host;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_tracker(mut self, tracker: ConnectionTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Messages in send order.
    pub fn messages(&self) -> &[OutgoingMessage] {
        &self.messages
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection, Connection::Connected { .. })
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.connection, Connection::Released)
    }

    /// Handle that makes an in-flight [`send`](Self::send) fail and releases
    /// the connection.
    pub fn canceller(&self) -> BatchCanceller {
        BatchCanceller {
            cancel: self.cancel.clone(),
        }
    }

    /// Connect to the destination. No retries.
    ///
    /// When the destination host is this machine, connects to
    /// `127.0.0.1:port` without resolving the host name.
    pub async fn connect(&mut self) -> TransportResult<()> {
        match self.connection {
            Connection::Unconnected => {}
            Connection::Connected { .. } => return Ok(()),
            Connection::Released => return Err(TransportError::Disposed),
        }

        let host = self.destination.host();
        let port = self.destination.port();
        let loopback = self.local_host.is_local(host);
        let attempt = async {
            if loopback {
                TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await
            } else {
                TcpStream::connect((host, port)).await
            }
        };

        let connected = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, attempt).await.map_err(|_| {
                TransportError::ConnectTimeout {
                    destination: self.destination.to_string(),
                    timeout,
                }
            })?,
            None => attempt.await,
        };
        let stream = connected.map_err(|source| TransportError::Connect {
            destination: self.destination.to_string(),
            source,
        })?;

        let guard = self.tracker.track(Direction::Outbound);
        tracing::debug!(
            destination = %self.destination,
            connection_id = %guard.id(),
            loopback,
            peer_addr = ?stream.peer_addr().ok(),
            "Connected"
        );
        self.connection = Connection::Connected { stream, guard };
        Ok(())
    }

    /// The connected socket, passed through the security transform.
    ///
    /// Every call applies the transform again to the same socket; a TLS
    /// transform handshakes each time, so take the stream once per exchange.
    pub async fn stream(&mut self) -> TransportResult<BoxedStream<'_>> {
        secure_stream(
            &mut self.connection,
            &self.destination,
            self.security.as_ref(),
        )
        .await
    }

    /// Write every message to the destination, in order, using `protocol`.
    ///
    /// Cancelling through a [`BatchCanceller`] makes this return
    /// [`TransportError::Cancelled`] and releases the connection.
    pub async fn send(&mut self, protocol: &dyn SendingProtocol) -> TransportResult<()> {
        let mut cancelled = self.cancel.subscribe();
        if !cancelled.is_triggered() {
            let result = tokio::select! {
                res = async {
                    let mut stream = secure_stream(
                        &mut self.connection,
                        &self.destination,
                        self.security.as_ref(),
                    )
                    .await?;
                    protocol.send(&mut *stream, &self.messages).await?;
                    Ok::<_, TransportError>(())
                } => res,
                _ = cancelled.wait() => Err(TransportError::Cancelled),
            };

            match result {
                Ok(()) => {
                    metrics::messages_sent(self.messages.len());
                    tracing::debug!(
                        destination = %self.destination,
                        count = self.messages.len(),
                        "Batch sent"
                    );
                    return Ok(());
                }
                Err(TransportError::Cancelled) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(destination = %self.destination, "Send cancelled");
        self.dispose();
        Err(TransportError::Cancelled)
    }

    /// Close the connection. Safe to call any number of times, connected
    /// or not.
    pub fn dispose(&mut self) {
        let previous = std::mem::replace(&mut self.connection, Connection::Released);
        if let Connection::Connected { stream, guard } = previous {
            drop(stream);
            tracing::debug!(
                destination = %self.destination,
                connection_id = %guard.id(),
                "Connection released"
            );
        }
    }
}

impl Drop for OutgoingBatch {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for OutgoingBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingBatch")
            .field("destination", &self.destination)
            .field("messages", &self.messages.len())
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

async fn secure_stream<'a>(
    connection: &'a mut Connection,
    destination: &Destination,
    security: &dyn StreamSecurity,
) -> TransportResult<BoxedStream<'a>> {
    match connection {
        Connection::Connected { stream, .. } => {
            Ok(security.apply(destination, Box::new(stream)).await?)
        }
        Connection::Unconnected => Err(TransportError::NotConnected),
        Connection::Released => Err(TransportError::Disposed),
    }
}

/// Cancels a batch's in-flight send from another task.
#[derive(Debug, Clone)]
pub struct BatchCanceller {
    cancel: Shutdown,
}

impl BatchCanceller {
    pub fn cancel(&self) {
        self.cancel.trigger();
    }
}
