//! Length-prefixed framing
//!
//! Every message is a 4-byte unsigned big-endian length N followed by N
//! payload bytes. Requests and replies use the same framing.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound for an incoming frame (64 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Errors from reading or writing frames
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Io(err)
        }
    }
}

/// Write one frame and flush it to the transport
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::FrameTooLarge {
        size: payload.len(),
        limit: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    debug!(len, "write_frame: sent frame");
    Ok(())
}

/// Read one frame, rejecting declared lengths above `max_len`
///
/// A stream that ends before the full prefix or payload arrives yields
/// [`FrameError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut header).await.map_err(FrameError::from_read)?;

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(FrameError::FrameTooLarge {
            size: len,
            limit: max_len,
        });
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut payload).await.map_err(FrameError::from_read)?;
    }
    debug!(len, "read_frame: received frame");
    Ok(payload)
}
