//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Node runtime: dispatch, tasks, move groups and motor status."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Node runtime.
//!
//! Frames from the bus are filtered and decoded by the CAN reader, routed by
//! the [`Dispatcher`] through a [`TaskClient`] into per-task queues, and
//! consumed by task threads that drive the hardware, the
//! [`MoveGroupCoordinator`] and each axis' [`MotorPositionStatus`].
#![warn(missing_docs)]

pub mod clients;
pub mod dispatch;
pub mod handlers;
pub mod messages;
pub mod motor_status;
pub mod move_group;
pub mod node;
pub mod tasks;

pub use clients::{
    CanWriterClient, EepromClient, MotorClient, MoveGroupClient, PresenceSensingClient,
    QueueClient, TaskClient,
};
pub use dispatch::{DispatchError, Dispatcher};
pub use handlers::{
    EepromHandler, MotionHandler, MoveGroupHandler, PresenceSensingHandler, SystemHandler,
};
pub use messages::{
    CanWriterTaskMessage, EepromTaskMessage, MotorTaskMessage, MoveGroupTaskMessage,
    PresenceSensingTaskMessage,
};
pub use motor_status::{MotorFlags, MotorPositionStatus};
pub use move_group::{
    AxisId, GateOutcome, GroupInfo, GroupState, MoveDescriptor, MoveGroupCoordinator,
    MoveGroupError, ReleaseGate,
};
pub use node::{open_transport, Node, NodeHandle, NodeHardware, SimulatedHardware};
pub use tasks::motor::AxisHardware;
pub use tasks::ToolType;
