//! ---
//! nb_section: "02-messaging-wire-format"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Structured logging helpers for bus traffic."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use tracing::debug;

use crate::catalog::Message;
use crate::frame::Frame;
use crate::ids::ArbitrationId;

/// Direction of the frame movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Frame handed to a transport.
    Outbound,
    /// Frame taken from a transport.
    Inbound,
    /// Frame discarded by the acceptance filters.
    Rejected,
}

/// Emit a structured log entry for frame activity.
///
/// `message` is the decoded form when the caller already has it.
pub fn log_frame(direction: FrameDirection, frame: &Frame, message: Option<&Message>) {
    let header = ArbitrationId::from_raw(frame.arbitration_id());
    debug!(
        arbitration_id = frame.arbitration_id(),
        message_id = header.message_id,
        destination = header.node_id,
        origin = header.originating_node_id,
        len = frame.len(),
        kind = message.map(Message::name).unwrap_or("-"),
        direction = ?direction,
        "bus activity"
    );
}
