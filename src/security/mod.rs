//! Stream security transforms.
//!
//! # Data Flow
//! ```text
//! accepted socket  ─┐                         ┌─→ ReceivingProtocol
//!                   ├─→ StreamSecurity::apply ─┤
//! connected socket ─┘                         └─→ SendingProtocol
//! ```
//!
//! The same trait serves both directions. Plain delivery uses [`NoSecurity`];
//! TLS uses [`tls::TlsClientSecurity`] outbound and
//! [`tls::TlsServerSecurity`] inbound.

pub mod tls;

use async_trait::async_trait;

use crate::error::SecurityError;
use crate::net::destination::Destination;
use crate::net::stream::BoxedStream;

pub use tls::{TlsClientSecurity, TlsServerSecurity};

/// Wraps a freshly connected or accepted stream.
///
/// The result depends only on the destination and the stream handed in.
/// Implementations that handshake do so before returning, so a failed
/// handshake surfaces as an error here rather than on a later read or write.
#[async_trait]
pub trait StreamSecurity: Send + Sync + std::fmt::Debug {
    async fn apply<'a>(
        &self,
        destination: &Destination,
        stream: BoxedStream<'a>,
    ) -> Result<BoxedStream<'a>, SecurityError>;
}

/// Passes streams through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecurity;

#[async_trait]
impl StreamSecurity for NoSecurity {
    async fn apply<'a>(
        &self,
        _destination: &Destination,
        stream: BoxedStream<'a>,
    ) -> Result<BoxedStream<'a>, SecurityError> {
        Ok(stream)
    }
}
