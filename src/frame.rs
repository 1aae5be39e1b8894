//! Length-prefixed framing used to talk to the server under test.
//!
//! ```text
//! frame := be_u32(len(payload)) || payload
//! ```
//!
//! There is no delimiter and no escaping; the payload is opaque bytes.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{Encoder, FramedRead, LengthDelimitedCodec};

use crate::error::{HarnessError, Result};

/// Size of the length prefix in bytes.
pub const PREFIX_LEN: usize = 4;

/// Largest payload the prefix can describe.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

/// Codec for the wire format: 4-byte big-endian length, no adjustment.
///
/// Peers that want to bound memory can lower the limit with
/// [`codec_with_limit`].
pub fn codec() -> LengthDelimitedCodec {
    codec_with_limit(MAX_PAYLOAD_LEN)
}

pub fn codec_with_limit(max_payload_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(PREFIX_LEN)
        .big_endian()
        .max_frame_length(max_payload_len)
        .new_codec()
}

/// The prefix announcing a payload of `len` bytes.
pub fn length_prefix(len: usize) -> Result<[u8; PREFIX_LEN]> {
    let len = u32::try_from(len).map_err(|_| HarnessError::FrameTooLarge { len })?;
    Ok(len.to_be_bytes())
}

/// Encodes one frame. The result is written as a single message.
pub fn encode(payload: &[u8]) -> Result<BytesMut> {
    length_prefix(payload.len())?;

    let mut frame = BytesMut::with_capacity(PREFIX_LEN + payload.len());
    codec()
        .encode(Bytes::copy_from_slice(payload), &mut frame)
        .map_err(HarnessError::Io)?;
    Ok(frame)
}

/// Reads the next frame from `reader`.
///
/// Returns `Ok(None)` on a clean end of stream between frames; a stream
/// that ends inside a frame is an error.
pub async fn read_frame<R>(reader: &mut FramedRead<R, LengthDelimitedCodec>) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    match reader.next().await {
        Some(Ok(frame)) => Ok(Some(frame.freeze())),
        Some(Err(e)) => Err(HarnessError::Io(e)),
        None => Ok(None),
    }
}
