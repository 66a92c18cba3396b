//! Control channel between the supervisor and the worker.
//!
//! Every message is a JSON document framed by a 4-byte big-endian length
//! prefix (see [`codec`]). The only unframed traffic is the single start byte
//! the supervisor sends once the data connection is up.

pub mod codec;
pub mod documents;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

pub use codec::{ControlCodec, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control channel closed by peer")]
    Closed,

    #[error("control channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("declared frame length {len} exceeds maximum of {max} bytes")]
    Oversized { len: usize, max: usize },

    #[error("malformed control document: {0:#}")]
    Malformed(anyhow::Error),

    #[error("failed to encode control document: {0:#}")]
    Encode(anyhow::Error),
}

/// Map EOF during a read to [`ControlError::Closed`].
fn read_error(e: std::io::Error) -> ControlError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ControlError::Closed
    } else {
        ControlError::Io(e)
    }
}

/// Receive one length-prefixed JSON document.
///
/// Reads until the full declared length has arrived. A peer that closes the
/// stream mid-frame yields [`ControlError::Closed`].
pub async fn receive_message<R>(channel: &mut R) -> Result<Value, ControlError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    channel.read_exact(&mut prefix).await.map_err(read_error)?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ControlError::Oversized {
            len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    channel.read_exact(&mut payload).await.map_err(read_error)?;
    trace!(len, "received control frame");

    codec::decode_message(&payload).map_err(ControlError::Malformed)
}

/// Send one document as a length-prefixed JSON frame.
///
/// All bytes are written before returning; a write error aborts the call.
pub async fn send_message<W, T>(channel: &mut W, message: &T) -> Result<(), ControlError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let frame = codec::encode_message(message).map_err(ControlError::Encode)?;
    channel.write_all(&frame).await?;
    channel.flush().await?;
    trace!(len = frame.len() - LENGTH_PREFIX_SIZE, "sent control frame");
    Ok(())
}

/// Wait for the supervisor's raw start byte and return its value.
pub async fn receive_start_signal<R>(channel: &mut R) -> Result<u8, ControlError>
where
    R: AsyncRead + Unpin,
{
    let mut state = [0u8; 1];
    channel.read_exact(&mut state).await.map_err(read_error)?;
    Ok(state[0])
}
