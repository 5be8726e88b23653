//! Exact-length reads over a byte stream.
//!
//! A single read on a socket (or a TLS stream layered on one) may hand back
//! fewer bytes than asked for. Framing code needs whole headers and whole
//! payloads, so it goes through these helpers instead of a bare `read`.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Bytes read by [`read_bytes_counted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBytes {
    /// Buffer of the requested length. Bytes past `filled` are zero.
    pub buf: Vec<u8>,
    /// Number of bytes actually delivered by the source.
    pub filled: usize,
}

impl ReadBytes {
    /// True when the source delivered every requested byte.
    pub fn is_complete(&self) -> bool {
        self.filled == self.buf.len()
    }

    /// True when the source was already at EOF and delivered nothing.
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }
}

/// Read exactly `len` bytes from `source`, accumulating across short reads.
///
/// Stops when `len` bytes have arrived or a read returns zero (EOF).
///
/// If the source reaches EOF early, the returned buffer is still `len` bytes
/// long: the delivered bytes come first and the tail stays zeroed. A caller
/// cannot tell that apart from a complete read whose tail happens to be
/// zero. Use [`read_bytes_counted`] when the distinction matters.
pub async fn read_bytes<R>(source: &mut R, len: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(read_bytes_counted(source, len).await?.buf)
}

/// Same loop as [`read_bytes`], also reporting how many bytes were filled.
pub async fn read_bytes_counted<R>(source: &mut R, len: usize) -> io::Result<ReadBytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; len];
    let mut filled = 0;

    while filled < len {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(ReadBytes { buf, filled })
}
