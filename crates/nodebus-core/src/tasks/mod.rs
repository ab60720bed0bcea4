//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Task threads owning one inbound queue each."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Every task owns its [`MessageQueue`] and loops on a timed receive,
//! checking the shared [`ShutdownSignal`](nodebus_rt::ShutdownSignal)
//! between waits.

use std::time::Duration;

use nodebus_msg::catalog::ErrorMessage;
use nodebus_msg::{ErrorCode, ErrorSeverity, NodeId};
use nodebus_rt::MessageQueue;
use tracing::warn;

use crate::clients::CanWriterClient;
use crate::messages::{
    CanWriterTaskMessage, EepromTaskMessage, MotorTaskMessage, MoveGroupTaskMessage,
    PresenceSensingTaskMessage,
};

pub mod can;
pub mod eeprom;
pub mod motor;
pub mod move_group;
pub mod presence;

pub use can::{CanReader, CanWriter};
pub use eeprom::EepromTask;
pub use motor::MotorTask;
pub use move_group::MoveGroupTask;
pub use presence::{PresenceChannels, PresenceSensingTask, ToolType};

/// Capacity of each motor task queue.
pub const MOTOR_QUEUE_DEPTH: usize = 16;
/// Capacity of the move-group task queue.
pub const MOVE_GROUP_QUEUE_DEPTH: usize = 16;
/// Capacity of the EEPROM task queue.
pub const EEPROM_QUEUE_DEPTH: usize = 8;
/// Capacity of the presence-sensing task queue.
pub const PRESENCE_QUEUE_DEPTH: usize = 8;
/// Capacity of the CAN writer queue.
pub const CAN_WRITER_QUEUE_DEPTH: usize = 32;

/// Inbound queue of one motor task.
pub type MotorQueue = MessageQueue<MotorTaskMessage, MOTOR_QUEUE_DEPTH>;
/// Inbound queue of the move-group task.
pub type MoveGroupQueue = MessageQueue<MoveGroupTaskMessage, MOVE_GROUP_QUEUE_DEPTH>;
/// Inbound queue of the EEPROM task.
pub type EepromQueue = MessageQueue<EepromTaskMessage, EEPROM_QUEUE_DEPTH>;
/// Inbound queue of the presence-sensing task.
pub type PresenceQueue = MessageQueue<PresenceSensingTaskMessage, PRESENCE_QUEUE_DEPTH>;
/// Outbound queue drained by the CAN writer.
pub type CanWriterQueue = MessageQueue<CanWriterTaskMessage, CAN_WRITER_QUEUE_DEPTH>;

/// Longest a task blocks on its queue before rechecking shutdown.
pub const QUEUE_POLL: Duration = Duration::from_millis(20);

/// Timeout for one peripheral transfer.
pub const PERIPHERAL_TIMEOUT: Duration = Duration::from_millis(10);

/// Send an [`ErrorMessage`] to the host.
pub(crate) fn report_error<C: CanWriterClient + ?Sized>(
    client: &C,
    origin: NodeId,
    severity: ErrorSeverity,
    code: ErrorCode,
) {
    let report = CanWriterTaskMessage::reply_from(origin, ErrorMessage::new(severity, code));
    if !client.send_can_writer_queue(report) {
        warn!(?origin, ?code, "error report dropped");
    }
}
