//! Length-prefixed JSON frames.
//!
//! ```text
//! +----------------+---------------------------+
//! | len: u32 (BE)  | len bytes of JSON Message |
//! +----------------+---------------------------+
//! ```
//!
//! A connection carries any number of frames. EOF on a frame boundary ends
//! the sequence cleanly; EOF anywhere else is a truncated frame.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::io::{AsyncRead, AsyncWriteExt};

use super::{Message, MessageStream, OutgoingMessage, ReceivingProtocol, SendingProtocol};
use crate::error::ProtocolError;
use crate::net::frame::read_bytes_counted;
use crate::net::stream::{AsyncStream, BoxedStream};

/// Size of the length header.
pub const HEADER_LEN: usize = 4;

/// Default cap on a single frame body.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// The crate's framing protocol, usable on both sides of a connection.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedProtocol {
    max_frame_bytes: usize,
}

impl LengthPrefixedProtocol {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl Default for LengthPrefixedProtocol {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

/// Read one frame. `Ok(None)` means the stream ended between frames.
pub async fn read_frame<R>(r: &mut R, max_frame_bytes: usize) -> Result<Option<Message>, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let head = read_bytes_counted(r, HEADER_LEN).await?;
    if head.is_empty() {
        return Ok(None);
    }
    if !head.is_complete() {
        return Err(ProtocolError::Truncated {
            expected: HEADER_LEN,
            got: head.filled,
        });
    }

    let len = u32::from_be_bytes([head.buf[0], head.buf[1], head.buf[2], head.buf[3]]) as usize;
    if len > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    let body = read_bytes_counted(r, len).await?;
    if !body.is_complete() {
        return Err(ProtocolError::Truncated {
            expected: len,
            got: body.filled,
        });
    }

    serde_json::from_slice(&body.buf)
        .map(Some)
        .map_err(ProtocolError::Decode)
}

/// Encode one message as a complete frame.
pub fn encode_frame(message: &Message, max_frame_bytes: usize) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
    if body.len() > max_frame_bytes || body.len() > u32::MAX as usize {
        return Err(ProtocolError::FrameTooLarge {
            len: body.len(),
            max: max_frame_bytes,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

impl ReceivingProtocol for LengthPrefixedProtocol {
    fn receive_stream(&self, stream: BoxedStream<'static>) -> MessageStream {
        let max = self.max_frame_bytes;
        stream::unfold(Some(stream), move |state| async move {
            let mut stream = state?;
            match read_frame(&mut stream, max).await {
                Ok(Some(message)) => Some((Ok(message), Some(stream))),
                Ok(None) => None,
                // Stream is dropped here; nothing follows an error.
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}

#[async_trait]
impl SendingProtocol for LengthPrefixedProtocol {
    async fn send(
        &self,
        sink: &mut (dyn AsyncStream + '_),
        messages: &[OutgoingMessage],
    ) -> Result<(), ProtocolError> {
        for outgoing in messages {
            let frame = encode_frame(&outgoing.to_message(), self.max_frame_bytes)?;
            sink.write_all(&frame).await?;
            tracing::trace!(message_id = %outgoing.id, queue = %outgoing.queue, bytes = frame.len(), "Frame written");
        }
        sink.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use tokio::io::{duplex, AsyncWriteExt};

    fn frame_for(queue: &str, data: &[u8]) -> Vec<u8> {
        let msg = OutgoingMessage::new(queue, data.to_vec()).to_message();
        encode_frame(&msg, DEFAULT_MAX_FRAME_BYTES).unwrap()
    }

    #[tokio::test]
    async fn decodes_frames_written_in_fragments() {
        let (client, mut server) = duplex(8);
        let protocol = LengthPrefixedProtocol::default();

        let mut bytes = frame_for("a", b"first");
        bytes.extend(frame_for("b", b"second"));
        let writer = tokio::spawn(async move {
            for chunk in bytes.chunks(3) {
                server.write_all(chunk).await.unwrap();
            }
        });

        let messages: Vec<Message> = protocol
            .receive_stream(Box::new(client))
            .try_collect()
            .await
            .unwrap();
        writer.await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].queue, "a");
        assert_eq!(messages[0].data, b"first");
        assert_eq!(messages[1].queue, "b");
        assert_eq!(messages[1].data, b"second");
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let (client, mut server) = duplex(1024);
        let frame = frame_for("a", b"payload");
        server.write_all(&frame[..frame.len() - 2]).await.unwrap();
        drop(server);

        let mut messages = LengthPrefixedProtocol::default().receive_stream(Box::new(client));
        let err = messages.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { got, expected } if got + 2 == expected));
        assert!(messages.next().await.is_none());
    }

    #[tokio::test]
    async fn truncated_header_is_an_error() {
        let (client, mut server) = duplex(64);
        server.write_all(&[0, 0]).await.unwrap();
        drop(server);

        let mut messages = LengthPrefixedProtocol::default().receive_stream(Box::new(client));
        let err = messages.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { expected: 4, got: 2 }));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (client, mut server) = duplex(64);
        server.write_all(&1024u32.to_be_bytes()).await.unwrap();

        let mut messages = LengthPrefixedProtocol::new(512).receive_stream(Box::new(client));
        let err = messages.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { len: 1024, max: 512 }));
    }

    #[tokio::test]
    async fn send_writes_messages_in_order() {
        let (mut client, server) = duplex(64 * 1024);
        let protocol = LengthPrefixedProtocol::default();
        let outgoing = vec![
            OutgoingMessage::new("q", b"A".to_vec()),
            OutgoingMessage::new("q", b"B".to_vec()),
            OutgoingMessage::new("q", b"C".to_vec()),
        ];

        protocol.send(&mut client, &outgoing).await.unwrap();
        drop(client);

        let received: Vec<Message> = protocol
            .receive_stream(Box::new(server))
            .try_collect()
            .await
            .unwrap();
        let ids: Vec<_> = received.iter().map(|m| m.id).collect();
        let expected: Vec<_> = outgoing.iter().map(|m| m.id).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn send_fails_when_the_sink_closes() {
        let (mut client, server) = duplex(16);
        drop(server);

        let outgoing = vec![OutgoingMessage::new("q", vec![7u8; 256])];
        let err = LengthPrefixedProtocol::default()
            .send(&mut client, &outgoing)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
