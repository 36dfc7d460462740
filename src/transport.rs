//! Framed Transport (C1).
//!
//! Wire framing per the protocol: every JSON envelope is preceded by an
//! 8-character lowercase hex length (of the JSON body *including* its
//! trailing newline) followed by a newline, followed by the body bytes.
//! The header is always exactly 9 bytes.
//!
//! Implemented as a `tokio_util::codec::{Decoder, Encoder}` pair so callers
//! can drive it with `tokio_util::codec::Framed`, which already gives the
//! "reads drive the state machine, writes are fire-and-forget, one half
//! never blocks the other" behavior the protocol requires for free — the
//! `Sink`/`Stream` halves of `Framed` are independent.

use crate::error::FrameError;
use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

/// Length of the hex-length-plus-newline header, in bytes.
const HEADER_LEN: usize = 9;

/// Codec translating between raw bytes and JSON envelopes.
///
/// `Decoder::Item`/`Encoder::Item` are `serde_json::Value` rather than a
/// strongly-typed envelope: C1 only knows about "a JSON object", the typed
/// request/response/event split is C2's concern (spec.md §4.1 vs §4.2).
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Value;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = &src[..8];
        if src[8] != b'\n' {
            return Err(FrameError::InvalidLength(src[..HEADER_LEN].to_vec()));
        }
        let header_str =
            std::str::from_utf8(header).map_err(|_| FrameError::InvalidLength(header.to_vec()))?;
        let body_len = usize::from_str_radix(header_str, 16)
            .map_err(|_| FrameError::InvalidLength(header.to_vec()))?;

        let total_len = HEADER_LEN + body_len;
        if src.len() < total_len {
            // Need more data; leave the buffer untouched so we re-parse the
            // (cheap) header once more bytes arrive.
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(body_len);

        let value: Value = serde_json::from_slice(&body)?;
        Ok(Some(value))
    }
}

impl Encoder<Value> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), FrameError> {
        let mut body = serde_json::to_vec(&item)?;
        body.push(b'\n');

        dst.reserve(HEADER_LEN + body.len());
        dst.put_slice(format!("{:08x}\n", body.len()).as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}
