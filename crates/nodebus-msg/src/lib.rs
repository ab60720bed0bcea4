//! ---
//! nb_section: "02-messaging-wire-format"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Wire-level building blocks shared by every node."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Wire-level building blocks shared by every node on the bus.
//!
//! * [`codec`] converts fixed-width integers to and from big-endian bytes.
//! * [`ids`] holds message ids, node ids and the arbitration id layout.
//! * [`catalog`] defines every protocol message and the [`Message`] sum type.
//! * [`frame`] carries an arbitration id plus a bounded payload.
#![warn(missing_docs)]

pub mod catalog;
pub mod codec;
pub mod frame;
pub mod ids;
pub mod logging;

pub use catalog::{ErrorCode, ErrorSeverity, Message, WireMessage};
pub use codec::{decode_uint, encode_uint, CodecError, Reader, WireInt, Writer};
pub use frame::{Frame, FrameError, Mtu, MAX_PAYLOAD_LEN};
pub use ids::{ArbitrationId, FunctionCode, MessageId, NodeId, UnknownId};
pub use logging::{log_frame, FrameDirection};
