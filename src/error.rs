//! Error types shared across the transport.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the receiver and outgoing batches.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listening socket could not be bound or activated.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Accepting an inbound connection failed.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    /// Establishing an outbound connection failed.
    #[error("failed to connect to {destination}: {source}")]
    Connect {
        destination: String,
        #[source]
        source: std::io::Error,
    },

    /// The connect attempt did not complete in time.
    #[error("connect to {destination} timed out after {timeout:?}")]
    ConnectTimeout { destination: String, timeout: Duration },

    /// The batch has no established connection.
    #[error("batch is not connected")]
    NotConnected,

    /// The batch was disposed.
    #[error("batch has been disposed")]
    Disposed,

    /// The receiver was disposed.
    #[error("receiver has been stopped")]
    Stopped,

    /// An in-flight send was cancelled.
    #[error("send cancelled")]
    Cancelled,

    /// The destination URI is missing a host or port.
    #[error("invalid destination {uri}: {reason}")]
    InvalidDestination { uri: String, reason: String },

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Terminal error delivered to every subscriber of a shared inbound sequence.
pub type SharedError = Arc<TransportError>;

/// Errors from a stream security transform.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// The TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    /// The destination host is not a valid TLS server name.
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// Certificates, keys or the TLS configuration could not be loaded.
    #[error("TLS configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame header announced more bytes than allowed.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// The stream closed in the middle of a frame.
    #[error("stream closed mid-frame: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
