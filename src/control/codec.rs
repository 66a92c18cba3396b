//! Length-prefixed frame codec for the worker control channel.
//!
//! Frames are encoded as a 4-byte big-endian length prefix followed by a JSON
//! payload. The length field describes only the payload size (not including
//! itself). Maximum frame size is 1 MB.

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Size of the big-endian length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum frame payload size: 1 MB.
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Control channel codec producing and consuming JSON documents.
///
/// Wraps a [`LengthDelimitedCodec`] configured for:
/// - u32 big-endian length prefix (4 bytes)
/// - Max frame size: 1 MB
/// - Length field covers payload only (not the prefix itself)
///
/// The worker itself reads and writes frames directly (see
/// [`super::receive_message`]); this codec is the supervisor-side view of the
/// same wire format, meant for `tokio_util::codec::Framed`.
pub struct ControlCodec {
    inner: LengthDelimitedCodec,
}

impl ControlCodec {
    pub fn new() -> Self {
        let inner = LengthDelimitedCodec::builder()
            .big_endian()
            .length_field_length(LENGTH_PREFIX_SIZE)
            .max_frame_length(MAX_FRAME_SIZE)
            .length_adjustment(0)
            .new_codec();

        Self { inner }
    }
}

impl Default for ControlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Value> for ControlCodec {
    type Error = anyhow::Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).context("failed to serialize control document")?;
        self.inner
            .encode(Bytes::from(json), dst)
            .map_err(|e| anyhow::anyhow!(e))
    }
}

impl Decoder for ControlCodec {
    type Item = Value;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src).map_err(|e| anyhow::anyhow!(e))? {
            Some(bytes) => {
                let doc = serde_json::from_slice(&bytes)
                    .context("failed to deserialize control document")?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }
}

/// Serialize a message to JSON, then wrap it in a length-prefixed frame.
///
/// Returns the complete frame (4-byte length prefix + JSON payload) as [`Bytes`].
pub fn encode_message<T: Serialize + ?Sized>(msg: &T) -> Result<Bytes> {
    let json = serde_json::to_vec(msg).context("failed to serialize message to JSON")?;

    if json.len() > MAX_FRAME_SIZE {
        anyhow::bail!(
            "serialized message ({} bytes) exceeds max frame size ({} bytes)",
            json.len(),
            MAX_FRAME_SIZE
        );
    }

    let len = json.len() as u32;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);

    Ok(buf.freeze())
}

/// Decode a JSON message from a frame payload (without the length prefix).
pub fn decode_message<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).context("failed to deserialize message from JSON frame")
}
