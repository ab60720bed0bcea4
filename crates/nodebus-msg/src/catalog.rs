//! ---
//! nb_section: "02-messaging-wire-format"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Message catalog and big-endian wire codec."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Protocol message catalog.
//!
//! Every message is a plain struct of integer fields laid out big-endian in
//! declaration order with no length prefix; its size is implied by its
//! [`MessageId`]. Parsing ignores trailing bytes but fails with
//! [`CodecError::TruncatedBuffer`] when a field is cut short.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, Reader, WireInt, Writer};
use crate::ids::MessageId;

/// Behaviour shared by every catalog entry.
///
/// Catalog structs also derive `serde::Serialize`, so wherever that trait is
/// in scope the wire encoder has to be called as
/// `WireMessage::serialize(&message, buffer)`.
pub trait WireMessage: Sized + Into<Message> {
    /// Identifier selecting this shape.
    const ID: MessageId;
    /// Encoded payload size in bytes.
    const SIZE: usize;

    /// Parse from a payload. Extra trailing bytes are ignored.
    fn parse(payload: &[u8]) -> Result<Self, CodecError>;

    /// Serialize into `buffer`, returning the number of bytes written.
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, CodecError>;
}

macro_rules! catalog {
    ($(
        $(#[$meta:meta])*
        $name:ident { $($field:ident : $ty:ty),* $(,)? }
    )*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
            pub struct $name {
                $(#[allow(missing_docs)] pub $field: $ty,)*
            }

            impl WireMessage for $name {
                const ID: MessageId = MessageId::$name;
                const SIZE: usize = 0 $(+ <$ty as WireInt>::SIZE)*;

                fn parse(payload: &[u8]) -> Result<Self, CodecError> {
                    #[allow(unused_mut, unused_variables)]
                    let mut reader = Reader::new(payload);
                    Ok(Self {
                        $($field: reader.read::<$ty>()?,)*
                    })
                }

                fn serialize(&self, buffer: &mut [u8]) -> Result<usize, CodecError> {
                    #[allow(unused_mut)]
                    let mut writer = Writer::new(buffer);
                    $(writer.write::<$ty>(self.$field)?;)*
                    Ok(writer.position())
                }
            }

            impl From<$name> for Message {
                fn from(value: $name) -> Self {
                    Message::$name(value)
                }
            }
        )*

        /// Any message the bus can carry.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(tag = "message", content = "fields", rename_all = "snake_case")]
        pub enum Message {
            /// Placeholder for frames whose id is not in the catalog.
            Empty,
            $(
                #[allow(missing_docs)]
                $name($name),
            )*
        }

        impl Message {
            /// Parse the shape selected by `id`.
            pub fn parse(id: MessageId, payload: &[u8]) -> Result<Self, CodecError> {
                match id {
                    $(MessageId::$name => $name::parse(payload).map(Message::$name),)*
                }
            }

            /// Identifier of this message, `None` for [`Message::Empty`].
            pub fn id(&self) -> Option<MessageId> {
                match self {
                    Message::Empty => None,
                    $(Message::$name(_) => Some(MessageId::$name),)*
                }
            }

            /// Serialize into `buffer`, returning the number of bytes written.
            pub fn serialize(&self, buffer: &mut [u8]) -> Result<usize, CodecError> {
                match self {
                    Message::Empty => Ok(0),
                    $(Message::$name(inner) => WireMessage::serialize(inner, buffer),)*
                }
            }

            /// Encoded payload size.
            pub fn encoded_len(&self) -> usize {
                match self {
                    Message::Empty => 0,
                    $(Message::$name(_) => <$name as WireMessage>::SIZE,)*
                }
            }

            /// Static name used in logs.
            pub fn name(&self) -> &'static str {
                match self {
                    Message::Empty => "Empty",
                    $(Message::$name(_) => stringify!($name),)*
                }
            }
        }
    };
}

catalog! {
    /// Halt all motion immediately.
    StopRequest {}
    /// Ask an axis for its status word.
    GetStatusRequest {}
    /// Error report; `severity` and `error_code` use the values in [`ErrorCode`].
    ErrorMessage { severity: u8, error_code: u16 }
    /// Set the axis speed.
    SetSpeedRequest { speed: u32 }
    /// Status word reply.
    GetStatusResponse { status: u8, data: u32 }
    /// Energise the motor.
    EnableMotorRequest {}
    /// De-energise the motor.
    DisableMotorRequest {}
    /// Ask for the current speed.
    GetSpeedRequest {}
    /// Relative move in steps.
    MoveRequest { steps: u32 }
    /// Speed reply.
    GetSpeedResponse { speed: u32 }
    /// A move in a group finished.
    MoveCompleted { group_id: u8, seq_id: u8, current_position: u32, ack_id: u8 }
    /// Append a linear move for the receiving axis to a group.
    AddLinearMoveRequest {
        group_id: u8,
        seq_id: u8,
        duration: u32,
        velocity: i32,
        acceleration: i32,
    }
    /// Ask for a group summary.
    GetMoveGroupRequest { group_id: u8 }
    /// Group summary reply.
    GetMoveGroupResponse { group_id: u8, num_moves: u8, total_duration: u32 }
    /// Start a move group.
    ExecuteMoveGroupRequest { group_id: u8, start_trigger: u8, cancel_trigger: u8 }
    /// Drop every move group.
    ClearAllMoveGroupsRequest {}
    /// Ask for the limit switch state.
    ReadLimitSwitchRequest {}
    /// Limit switch reply, 1 when the switch is engaged.
    ReadLimitSwitchResponse { switch_status: u8 }
    /// Write a motor driver register.
    WriteMotorDriverRegister { reg_address: u8, data: u32 }
    /// Read a motor driver register.
    ReadMotorDriverRegister { reg_address: u8 }
    /// Motor driver register reply.
    ReadMotorDriverRegisterResponse { reg_address: u8, data: u32 }
    /// Set velocity and acceleration limits.
    SetMotionConstraints {
        min_velocity: i32,
        max_velocity: i32,
        min_acceleration: i32,
        max_acceleration: i32,
    }
    /// Ask for velocity and acceleration limits.
    GetMotionConstraintsRequest {}
    /// Motion limits reply.
    GetMotionConstraintsResponse {
        min_velocity: i32,
        max_velocity: i32,
        min_acceleration: i32,
        max_acceleration: i32,
    }
    /// Write a word to EEPROM.
    WriteToEepromRequest { address: u8, data: u32 }
    /// Read a word from EEPROM.
    ReadFromEepromRequest { address: u8 }
    /// EEPROM word reply.
    ReadFromEepromResponse { address: u8, data: u32 }
    /// Ask for firmware information.
    DeviceInfoRequest {}
    /// Firmware information reply.
    DeviceInfoResponse { version: u32 }
    /// Liveness reply.
    HeartbeatResponse {}
    /// Liveness check.
    HeartbeatRequest {}
    /// Ask for the tool presence voltages.
    ReadPresenceSensingVoltageRequest {}
    /// Tool presence voltages in millivolts.
    ReadPresenceSensingVoltageResponse { z_motor: u16, a_motor: u16, gripper: u16 }
    /// Ask which tools are attached.
    AttachedToolsRequest {}
    /// Attached tool report; each field is a tool type code.
    ToolsDetectedNotification { z_motor: u8, a_motor: u8, gripper: u8 }
}

impl Message {
    /// Parse a payload for a raw id taken off the wire.
    ///
    /// Ids outside the catalog yield [`Message::Empty`] rather than an error so
    /// traffic for newer firmware passes through untouched.
    pub fn from_raw(raw_id: u16, payload: &[u8]) -> Result<Self, CodecError> {
        match MessageId::try_from(raw_id) {
            Ok(id) => Message::parse(id, payload),
            Err(_) => Ok(Message::Empty),
        }
    }
}

/// Error codes carried by [`ErrorMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unclassified failure.
    Unknown = 0x00,
    /// A request referenced a move group that does not exist.
    InvalidGroup = 0x01,
    /// Move group could not be armed or executed.
    MoveGroupRejected = 0x02,
    /// A task queue was full.
    QueueFull = 0x03,
    /// Peripheral transfer failed.
    HardwareFault = 0x04,
    /// Driver register address outside the 7-bit register map.
    InvalidRegister = 0x05,
}

/// Severity byte carried by [`ErrorMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorSeverity {
    /// Informational, no action needed.
    Warning = 0x1,
    /// The request failed.
    Recoverable = 0x2,
    /// The node cannot continue safely.
    Unrecoverable = 0x3,
}

impl ErrorMessage {
    /// Build an error report.
    pub fn new(severity: ErrorSeverity, code: ErrorCode) -> Self {
        Self {
            severity: severity as u8,
            error_code: code as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) {
        let mut buffer = [0u8; crate::frame::MAX_PAYLOAD_LEN];
        let len = message.serialize(&mut buffer).expect("serialize");
        assert_eq!(len, message.encoded_len(), "{}", message.name());
        let id = message.id().expect("catalog message");
        let parsed = Message::parse(id, &buffer[..len]).expect("parse");
        assert_eq!(parsed, message);
    }

    #[test]
    fn every_shape_roundtrips() {
        let samples: Vec<Message> = vec![
            StopRequest {}.into(),
            GetStatusRequest {}.into(),
            ErrorMessage::new(ErrorSeverity::Recoverable, ErrorCode::MoveGroupRejected).into(),
            SetSpeedRequest { speed: 1000 }.into(),
            GetStatusResponse { status: 1, data: 42 }.into(),
            EnableMotorRequest {}.into(),
            DisableMotorRequest {}.into(),
            GetSpeedRequest {}.into(),
            MoveRequest { steps: 0xDEAD_BEEF }.into(),
            GetSpeedResponse { speed: u32::MAX }.into(),
            MoveCompleted { group_id: 2, seq_id: 7, current_position: 1234, ack_id: 1 }.into(),
            AddLinearMoveRequest {
                group_id: 1,
                seq_id: 0,
                duration: 5000,
                velocity: -42,
                acceleration: i32::MIN,
            }
            .into(),
            GetMoveGroupRequest { group_id: 1 }.into(),
            GetMoveGroupResponse { group_id: 1, num_moves: 2, total_duration: 9000 }.into(),
            ExecuteMoveGroupRequest { group_id: 1, start_trigger: 0, cancel_trigger: 0 }.into(),
            ClearAllMoveGroupsRequest {}.into(),
            ReadLimitSwitchRequest {}.into(),
            ReadLimitSwitchResponse { switch_status: 1 }.into(),
            WriteMotorDriverRegister { reg_address: 0x6C, data: 0x0001_0005 }.into(),
            ReadMotorDriverRegister { reg_address: 0x6C }.into(),
            ReadMotorDriverRegisterResponse { reg_address: 0x6C, data: 7 }.into(),
            SetMotionConstraints {
                min_velocity: -10,
                max_velocity: 10,
                min_acceleration: -3,
                max_acceleration: 3,
            }
            .into(),
            GetMotionConstraintsRequest {}.into(),
            GetMotionConstraintsResponse {
                min_velocity: 1,
                max_velocity: 2,
                min_acceleration: 3,
                max_acceleration: 4,
            }
            .into(),
            WriteToEepromRequest { address: 4, data: 0xCAFE }.into(),
            ReadFromEepromRequest { address: 4 }.into(),
            ReadFromEepromResponse { address: 4, data: 0xCAFE }.into(),
            DeviceInfoRequest {}.into(),
            DeviceInfoResponse { version: 3 }.into(),
            HeartbeatResponse {}.into(),
            HeartbeatRequest {}.into(),
            ReadPresenceSensingVoltageRequest {}.into(),
            ReadPresenceSensingVoltageResponse { z_motor: 1800, a_motor: 0, gripper: 2700 }.into(),
            AttachedToolsRequest {}.into(),
            ToolsDetectedNotification { z_motor: 1, a_motor: 0, gripper: 2 }.into(),
        ];
        assert_eq!(samples.len(), MessageId::ALL.len(), "one sample per id");
        for message in samples {
            roundtrip(message);
        }
    }

    #[test]
    fn get_status_response_decodes_reference_bytes() {
        let parsed =
            Message::parse(MessageId::GetStatusResponse, &[0x01, 0x00, 0x00, 0x00, 0x2A]).unwrap();
        assert_eq!(
            parsed,
            Message::GetStatusResponse(GetStatusResponse { status: 1, data: 42 })
        );
    }

    #[test]
    fn set_speed_request_reencodes_identically() {
        let bytes = [0x00, 0x00, 0x03, 0xE8];
        let parsed = SetSpeedRequest::parse(&bytes).unwrap();
        assert_eq!(parsed.speed, 1000);
        let mut out = [0u8; 4];
        assert_eq!(WireMessage::serialize(&parsed, &mut out).unwrap(), 4);
        assert_eq!(out, bytes);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let parsed = SetSpeedRequest::parse(&[0x00, 0x00, 0x00, 0x05, 0xAA, 0xBB]).unwrap();
        assert_eq!(parsed.speed, 5);
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        let err = Message::parse(MessageId::GetStatusResponse, &[0x01, 0x00]).unwrap_err();
        assert_eq!(
            err,
            CodecError::TruncatedBuffer {
                needed: 4,
                available: 1
            }
        );
    }

    #[test]
    fn empty_messages_parse_from_nothing() {
        assert_eq!(
            Message::parse(MessageId::HeartbeatRequest, &[]).unwrap(),
            Message::HeartbeatRequest(HeartbeatRequest {})
        );
        assert_eq!(HeartbeatResponse::SIZE, 0);
    }

    #[test]
    fn unknown_ids_become_empty() {
        assert_eq!(Message::from_raw(0x3AA, &[1, 2, 3]).unwrap(), Message::Empty);
        assert_eq!(Message::Empty.id(), None);
        assert_eq!(Message::Empty.encoded_len(), 0);
    }

    #[test]
    fn messages_render_as_tagged_json() {
        let json = serde_json::to_value(Message::SetSpeedRequest(SetSpeedRequest { speed: 7 }))
            .unwrap();
        assert_eq!(json["message"], "set_speed_request");
        assert_eq!(json["fields"]["speed"], 7);
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, Message::SetSpeedRequest(SetSpeedRequest { speed: 7 }));
    }
}
