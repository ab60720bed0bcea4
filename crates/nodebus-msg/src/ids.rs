//! ---
//! nb_section: "02-messaging-wire-format"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Message, node and function code ids plus the arbitration id layout."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a raw numeric id has no named counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown {kind} id {value:#x}")]
pub struct UnknownId {
    /// Which id space the value came from.
    pub kind: &'static str,
    /// The raw value.
    pub value: u32,
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ty as $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal,)*
        }
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr($repr)]
        $(#[$meta])*
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value,)*
        }

        impl $name {
            /// Every defined value, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            /// Raw wire value.
            pub const fn raw(self) -> $repr {
                self as $repr
            }
        }

        impl TryFrom<$repr> for $name {
            type Error = UnknownId;

            fn try_from(value: $repr) -> Result<Self, UnknownId> {
                match value {
                    $($value => Ok($name::$variant),)*
                    other => Err(UnknownId { kind: $kind, value: other as u32 }),
                }
            }
        }

        impl From<$name> for $repr {
            fn from(value: $name) -> Self {
                value as $repr
            }
        }
    };
}

wire_enum! {
    /// Identifier selecting one message shape in the catalog.
    #[serde(rename_all = "snake_case")]
    pub enum MessageId: u16 as "message" {
        /// Halt all motion immediately.
        StopRequest = 0x000,
        /// Ask an axis for its status word.
        GetStatusRequest = 0x001,
        /// Error report.
        ErrorMessage = 0x002,
        /// Set the axis speed.
        SetSpeedRequest = 0x004,
        /// Status word reply.
        GetStatusResponse = 0x005,
        /// Energise the motor.
        EnableMotorRequest = 0x006,
        /// De-energise the motor.
        DisableMotorRequest = 0x007,
        /// Ask for the current speed.
        GetSpeedRequest = 0x008,
        /// Relative move in steps.
        MoveRequest = 0x010,
        /// Speed reply.
        GetSpeedResponse = 0x011,
        /// A move in a group finished.
        MoveCompleted = 0x013,
        /// Append a linear move to a group.
        AddLinearMoveRequest = 0x015,
        /// Ask for a group summary.
        GetMoveGroupRequest = 0x016,
        /// Group summary reply.
        GetMoveGroupResponse = 0x017,
        /// Start a move group.
        ExecuteMoveGroupRequest = 0x018,
        /// Drop every move group.
        ClearAllMoveGroupsRequest = 0x019,
        /// Ask for the limit switch state.
        ReadLimitSwitchRequest = 0x020,
        /// Limit switch reply.
        ReadLimitSwitchResponse = 0x021,
        /// Write a motor driver register.
        WriteMotorDriverRegister = 0x030,
        /// Read a motor driver register.
        ReadMotorDriverRegister = 0x031,
        /// Motor driver register reply.
        ReadMotorDriverRegisterResponse = 0x032,
        /// Set velocity and acceleration limits.
        SetMotionConstraints = 0x101,
        /// Ask for velocity and acceleration limits.
        GetMotionConstraintsRequest = 0x102,
        /// Motion limits reply.
        GetMotionConstraintsResponse = 0x103,
        /// Write a word to EEPROM.
        WriteToEepromRequest = 0x201,
        /// Read a word from EEPROM.
        ReadFromEepromRequest = 0x202,
        /// EEPROM word reply.
        ReadFromEepromResponse = 0x203,
        /// Ask for firmware information.
        DeviceInfoRequest = 0x302,
        /// Firmware information reply.
        DeviceInfoResponse = 0x303,
        /// Liveness reply.
        HeartbeatResponse = 0x3FE,
        /// Liveness check.
        HeartbeatRequest = 0x3FF,
        /// Ask for the tool presence voltages.
        ReadPresenceSensingVoltageRequest = 0x600,
        /// Tool presence voltage reply.
        ReadPresenceSensingVoltageResponse = 0x601,
        /// Ask which tools are attached.
        AttachedToolsRequest = 0x700,
        /// Attached tool report.
        ToolsDetectedNotification = 0x701,
    }
}

wire_enum! {
    /// Bus node address carried in the arbitration id.
    #[serde(rename_all = "kebab-case")]
    pub enum NodeId: u8 as "node" {
        /// Every node.
        Broadcast = 0x0,
        /// Host computer.
        Host = 0x1,
        /// Left pipette mount.
        PipetteLeft = 0x2,
        /// Right pipette mount.
        PipetteRight = 0x3,
        /// Gantry X axis.
        GantryX = 0x4,
        /// Gantry Y axis.
        GantryY = 0x5,
        /// Head, left Z axis.
        HeadLeft = 0x6,
        /// Head, right Z axis.
        HeadRight = 0x7,
        /// Gripper.
        Gripper = 0x8,
        /// Rear panel.
        RearPanel = 0x9,
        /// HEPA/UV module.
        HepaUv = 0xA,
    }
}

wire_enum! {
    /// Priority class in the low arbitration bits. Lower wins arbitration.
    #[serde(rename_all = "kebab-case")]
    pub enum FunctionCode: u8 as "function code" {
        /// Network management (stop).
        NetworkManagement = 0x00,
        /// Synchronisation.
        Sync = 0x02,
        /// Error reports.
        Error = 0x04,
        /// Commands.
        Command = 0x10,
        /// Status replies.
        Status = 0x12,
        /// Parameter traffic.
        Parameters = 0x14,
        /// Liveness.
        Heartbeat = 0x7E,
    }
}

impl MessageId {
    /// Function code frames carrying this message are sent with.
    pub fn function_code(self) -> FunctionCode {
        match self {
            MessageId::StopRequest => FunctionCode::NetworkManagement,
            MessageId::ErrorMessage => FunctionCode::Error,
            MessageId::HeartbeatRequest | MessageId::HeartbeatResponse => FunctionCode::Heartbeat,
            MessageId::SetMotionConstraints
            | MessageId::GetMotionConstraintsRequest
            | MessageId::GetMotionConstraintsResponse
            | MessageId::WriteMotorDriverRegister
            | MessageId::ReadMotorDriverRegister
            | MessageId::ReadMotorDriverRegisterResponse
            | MessageId::WriteToEepromRequest
            | MessageId::ReadFromEepromRequest
            | MessageId::ReadFromEepromResponse => FunctionCode::Parameters,
            MessageId::GetStatusResponse
            | MessageId::GetSpeedResponse
            | MessageId::MoveCompleted
            | MessageId::GetMoveGroupResponse
            | MessageId::ReadLimitSwitchResponse
            | MessageId::DeviceInfoResponse
            | MessageId::ReadPresenceSensingVoltageResponse
            | MessageId::ToolsDetectedNotification => FunctionCode::Status,
            _ => FunctionCode::Command,
        }
    }
}

const FUNCTION_CODE_BITS: u32 = 7;
const NODE_ID_BITS: u32 = 4;
const MESSAGE_ID_BITS: u32 = 14;

const NODE_ID_SHIFT: u32 = FUNCTION_CODE_BITS;
const ORIGINATING_NODE_SHIFT: u32 = NODE_ID_SHIFT + NODE_ID_BITS;
const MESSAGE_ID_SHIFT: u32 = ORIGINATING_NODE_SHIFT + NODE_ID_BITS;

const FUNCTION_CODE_MASK: u32 = (1 << FUNCTION_CODE_BITS) - 1;
const NODE_MASK: u32 = (1 << NODE_ID_BITS) - 1;
const MESSAGE_MASK: u32 = (1 << MESSAGE_ID_BITS) - 1;

/// Decoded 29-bit arbitration id.
///
/// Layout, low bit first: function code (7), destination node (4),
/// originating node (4), message id (14).
///
/// Raw fields are kept as integers so frames from unknown peers can still be
/// inspected and filtered before anything is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArbitrationId {
    /// Priority class.
    pub function_code: u8,
    /// Destination node.
    pub node_id: u8,
    /// Sending node.
    pub originating_node_id: u8,
    /// Message identifier.
    pub message_id: u16,
}

impl ArbitrationId {
    /// Mask selecting the destination node bits of a raw id.
    pub const NODE_ID_MASK: u32 = NODE_MASK << NODE_ID_SHIFT;

    /// Build the id a node uses to send `message_id` to `destination`.
    pub fn new(message_id: MessageId, destination: NodeId, origin: NodeId) -> Self {
        Self {
            function_code: message_id.function_code().raw(),
            node_id: destination.raw(),
            originating_node_id: origin.raw(),
            message_id: message_id.raw(),
        }
    }

    /// Split a raw arbitration id into its fields.
    pub fn from_raw(raw: u32) -> Self {
        Self {
            function_code: (raw & FUNCTION_CODE_MASK) as u8,
            node_id: ((raw >> NODE_ID_SHIFT) & NODE_MASK) as u8,
            originating_node_id: ((raw >> ORIGINATING_NODE_SHIFT) & NODE_MASK) as u8,
            message_id: ((raw >> MESSAGE_ID_SHIFT) & MESSAGE_MASK) as u16,
        }
    }

    /// Pack into a raw arbitration id.
    pub fn raw(&self) -> u32 {
        (u32::from(self.function_code) & FUNCTION_CODE_MASK)
            | ((u32::from(self.node_id) & NODE_MASK) << NODE_ID_SHIFT)
            | ((u32::from(self.originating_node_id) & NODE_MASK) << ORIGINATING_NODE_SHIFT)
            | ((u32::from(self.message_id) & MESSAGE_MASK) << MESSAGE_ID_SHIFT)
    }

    /// Raw id bits a node id occupies in the destination field.
    pub fn node_bits(node: NodeId) -> u32 {
        (u32::from(node.raw()) & NODE_MASK) << NODE_ID_SHIFT
    }

    /// Destination node, if it is a known address.
    pub fn destination(&self) -> Result<NodeId, UnknownId> {
        NodeId::try_from(self.node_id)
    }

    /// Sending node, if it is a known address.
    pub fn origin(&self) -> Result<NodeId, UnknownId> {
        NodeId::try_from(self.originating_node_id)
    }
}
