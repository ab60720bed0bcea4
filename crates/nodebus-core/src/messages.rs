//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Per-task inbound message types."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! One message type per consuming task. Protocol requests travel unchanged;
//! internal commands carry whatever the task needs beyond the wire fields.

use nodebus_msg::catalog::*;
use nodebus_msg::{Message, NodeId};

use crate::move_group::{AxisId, MoveDescriptor, ReleaseGate};

macro_rules! wraps {
    ($target:ident { $($request:ident),* $(,)? }) => {
        $(
            impl From<$request> for $target {
                fn from(request: $request) -> Self {
                    $target::$request(request)
                }
            }
        )*
    };
}

/// Inbound traffic for one axis' motor task.
///
/// Variants named after a catalog request carry that request unchanged.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub enum MotorTaskMessage {
    StopRequest(StopRequest),
    GetStatusRequest(GetStatusRequest),
    SetSpeedRequest(SetSpeedRequest),
    GetSpeedRequest(GetSpeedRequest),
    EnableMotorRequest(EnableMotorRequest),
    DisableMotorRequest(DisableMotorRequest),
    MoveRequest(MoveRequest),
    SetMotionConstraints(SetMotionConstraints),
    GetMotionConstraintsRequest(GetMotionConstraintsRequest),
    ReadLimitSwitchRequest(ReadLimitSwitchRequest),
    WriteMotorDriverRegister(WriteMotorDriverRegister),
    ReadMotorDriverRegister(ReadMotorDriverRegister),
    /// A released move-group entry. Start only once `gate` opens.
    ExecuteMove {
        /// Group the move belongs to.
        group_id: u8,
        /// The axis' share of the group.
        descriptor: MoveDescriptor,
        /// Opens once every axis of the group has its move.
        gate: ReleaseGate,
    },
}

wraps!(MotorTaskMessage {
    StopRequest,
    GetStatusRequest,
    SetSpeedRequest,
    GetSpeedRequest,
    EnableMotorRequest,
    DisableMotorRequest,
    MoveRequest,
    SetMotionConstraints,
    GetMotionConstraintsRequest,
    ReadLimitSwitchRequest,
    WriteMotorDriverRegister,
    ReadMotorDriverRegister,
});

/// Inbound traffic for the move-group task.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub enum MoveGroupTaskMessage {
    /// Append `request` for `axis`.
    AddLinearMove {
        /// Axis the request was addressed to.
        axis: AxisId,
        /// The request as received.
        request: AddLinearMoveRequest,
    },
    GetMoveGroupRequest(GetMoveGroupRequest),
    ExecuteMoveGroupRequest(ExecuteMoveGroupRequest),
    ClearAllMoveGroupsRequest(ClearAllMoveGroupsRequest),
    /// A motor task finished its share of `group_id`.
    AxisCompleted {
        /// Group the finished move belonged to.
        group_id: u8,
        /// Axis that finished.
        axis: AxisId,
    },
}

wraps!(MoveGroupTaskMessage {
    GetMoveGroupRequest,
    ExecuteMoveGroupRequest,
    ClearAllMoveGroupsRequest,
});

/// Inbound traffic for the EEPROM task.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromTaskMessage {
    WriteToEepromRequest(WriteToEepromRequest),
    ReadFromEepromRequest(ReadFromEepromRequest),
}

wraps!(EepromTaskMessage {
    WriteToEepromRequest,
    ReadFromEepromRequest,
});

/// Inbound traffic for the presence-sensing task.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceSensingTaskMessage {
    ReadPresenceSensingVoltageRequest(ReadPresenceSensingVoltageRequest),
    AttachedToolsRequest(AttachedToolsRequest),
    /// Re-read the channels and notify the host if the tools changed.
    PollForChange,
}

wraps!(PresenceSensingTaskMessage {
    ReadPresenceSensingVoltageRequest,
    AttachedToolsRequest,
});

/// Outbound traffic for the CAN writer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanWriterTaskMessage {
    /// Put `message` on the bus. `origin` defaults to the node's primary id.
    Send {
        /// Receiving node, normally the host.
        destination: NodeId,
        /// Originator written into the arbitration id.
        origin: Option<NodeId>,
        /// Payload to encode.
        message: Message,
    },
}

impl CanWriterTaskMessage {
    /// Node-level message for the host.
    pub fn to_host(message: impl Into<Message>) -> Self {
        CanWriterTaskMessage::Send {
            destination: NodeId::Host,
            origin: None,
            message: message.into(),
        }
    }

    /// Message for the host sent on behalf of `origin`, typically an axis.
    pub fn reply_from(origin: NodeId, message: impl Into<Message>) -> Self {
        CanWriterTaskMessage::Send {
            destination: NodeId::Host,
            origin: Some(origin),
            message: message.into(),
        }
    }
}
