//! ---
//! nb_section: "03-can-bus"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Stream framing used by the socket bus."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Stream framing for the simulated bus: `arbitration_id u32 BE`,
//! `length u32 BE`, then `length` payload bytes.

use nodebus_msg::{decode_uint, Frame, MAX_PAYLOAD_LEN};
use thiserror::Error;

/// Bytes preceding each payload.
pub const HEADER_LEN: usize = 8;

/// Malformed stream content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    /// Declared payload length exceeds any frame.
    #[error("declared payload length {0} exceeds the frame limit")]
    Oversized(u32),
}

/// Encode a frame for the stream.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + frame.len());
    out.extend_from_slice(&frame.arbitration_id().to_be_bytes());
    out.extend_from_slice(&(frame.len() as u32).to_be_bytes());
    out.extend_from_slice(frame.payload());
    out
}

/// Reassembles frames from arbitrary stream chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, WireError> {
        let Ok((arbitration_id, rest)) = decode_uint::<u32>(&self.buffer) else {
            return Ok(None);
        };
        let Ok((len, rest)) = decode_uint::<u32>(rest) else {
            return Ok(None);
        };
        if len as usize > MAX_PAYLOAD_LEN {
            return Err(WireError::Oversized(len));
        }
        let len = len as usize;
        if rest.len() < len {
            return Ok(None);
        }
        let frame = Frame::new(arbitration_id, &rest[..len])
            .map_err(|_| WireError::Oversized(len as u32))?;
        self.buffer.drain(..HEADER_LEN + len);
        Ok(Some(frame))
    }
}
