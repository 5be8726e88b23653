//! Framing protocol seams.
//!
//! The transport moves bytes; a protocol turns them into messages and back.
//! `length_prefixed` is the protocol shipped with the crate.

pub mod length_prefixed;
pub mod message;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::ProtocolError;
use crate::net::stream::{AsyncStream, BoxedStream};

pub use length_prefixed::LengthPrefixedProtocol;
pub use message::{Message, MessageId, OutgoingMessage};

/// Lazy sequence of messages decoded from one connection.
pub type MessageStream = BoxStream<'static, Result<Message, ProtocolError>>;

/// Receive side of a framing protocol.
pub trait ReceivingProtocol: Send + Sync {
    /// Decode messages from an accepted connection's stream.
    ///
    /// The returned sequence owns the stream. Messages must come out in the
    /// order their bytes were read; the stream is closed when the sequence is
    /// dropped.
    fn receive_stream(&self, stream: BoxedStream<'static>) -> MessageStream;
}

/// Send side of a framing protocol.
#[async_trait]
pub trait SendingProtocol: Send + Sync {
    /// Write `messages` to `sink` in order.
    async fn send(
        &self,
        sink: &mut (dyn AsyncStream + '_),
        messages: &[OutgoingMessage],
    ) -> Result<(), ProtocolError>;
}
