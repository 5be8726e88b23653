//! Type-erased byte streams passed between the socket, security and protocol layers.

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional async byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A boxed stream: a raw socket, or a socket wrapped by a security transform.
pub type BoxedStream<'a> = Box<dyn AsyncStream + 'a>;
