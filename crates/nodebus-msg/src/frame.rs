//! ---
//! nb_section: "02-messaging-wire-format"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Bounded bus frame and transport MTU."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::Message;
use crate::codec::CodecError;
use crate::ids::{ArbitrationId, NodeId};

/// Largest payload any transport carries (CAN-FD).
pub const MAX_PAYLOAD_LEN: usize = 64;

/// Transport maximum transmission unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mtu {
    /// Classic CAN, 8 data bytes.
    Classic,
    /// CAN-FD, 64 data bytes.
    #[default]
    Fd,
}

impl Mtu {
    /// Payload capacity in bytes.
    pub const fn capacity(self) -> usize {
        match self {
            Mtu::Classic => 8,
            Mtu::Fd => MAX_PAYLOAD_LEN,
        }
    }
}

/// Failure to build a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Payload exceeds [`MAX_PAYLOAD_LEN`].
    #[error("payload of {len} bytes exceeds the {max} byte frame limit")]
    PayloadTooLong {
        /// Offending length.
        len: usize,
        /// Limit that applied.
        max: usize,
    },
    /// The message could not be serialized.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// One bus frame: an opaque 32-bit routing key and up to 64 payload bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    arbitration_id: u32,
    len: u8,
    data: [u8; MAX_PAYLOAD_LEN],
}

impl Frame {
    /// Build a frame, copying `payload`.
    pub fn new(arbitration_id: u32, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLong {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            arbitration_id,
            len: payload.len() as u8,
            data,
        })
    }

    /// Serialize `message` into a frame addressed from `origin` to `destination`.
    pub fn from_message(
        message: &Message,
        destination: NodeId,
        origin: NodeId,
    ) -> Result<Self, FrameError> {
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        let len = message.serialize(&mut data)?;
        let arbitration_id = match message.id() {
            Some(id) => ArbitrationId::new(id, destination, origin).raw(),
            None => 0,
        };
        Ok(Self {
            arbitration_id,
            len: len as u8,
            data,
        })
    }

    /// Routing key.
    pub fn arbitration_id(&self) -> u32 {
        self.arbitration_id
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    /// True for zero-length payloads.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decode the payload using the message id in the arbitration field.
    ///
    /// Unknown message ids decode to [`Message::Empty`].
    pub fn decode(&self) -> Result<Message, CodecError> {
        let header = ArbitrationId::from_raw(self.arbitration_id);
        Message::from_raw(header.message_id, self.payload())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("arbitration_id", &format_args!("{:#010x}", self.arbitration_id))
            .field("payload", &self.payload())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GetStatusResponse, HeartbeatRequest};

    #[test]
    fn frame_rejects_oversized_payload() {
        let payload = [0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            Frame::new(1, &payload).unwrap_err(),
            FrameError::PayloadTooLong {
                len: 65,
                max: MAX_PAYLOAD_LEN
            }
        );
    }

    #[test]
    fn frame_from_message_uses_exact_encoded_length() {
        let message = Message::GetStatusResponse(GetStatusResponse { status: 1, data: 42 });
        let frame = Frame::from_message(&message, NodeId::Host, NodeId::GantryX).unwrap();
        assert_eq!(frame.payload(), &[0x01, 0x00, 0x00, 0x00, 0x2A]);
        assert_eq!(frame.decode().unwrap(), message);
    }

    #[test]
    fn empty_message_frames_have_no_payload() {
        let frame = Frame::from_message(
            &Message::HeartbeatRequest(HeartbeatRequest {}),
            NodeId::Broadcast,
            NodeId::Host,
        )
        .unwrap();
        assert!(frame.is_empty());
        assert_eq!(Mtu::Classic.capacity(), 8);
    }
}
