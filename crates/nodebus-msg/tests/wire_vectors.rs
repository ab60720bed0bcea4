//! ---
//! nb_section: "02-messaging-wire-format"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Wire vectors crossing frame, arbitration id and catalog."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use nodebus_msg::catalog::{
    AddLinearMoveRequest, GetStatusResponse, ReadPresenceSensingVoltageResponse, SetSpeedRequest,
};
use nodebus_msg::{ArbitrationId, Frame, FunctionCode, Message, MessageId, NodeId, WireMessage};

fn frame_for(id: MessageId, payload: &[u8]) -> Frame {
    let arbitration = ArbitrationId::new(id, NodeId::GantryX, NodeId::Host);
    Frame::new(arbitration.raw(), payload).expect("frame")
}

#[test]
fn status_response_from_the_bus() {
    let frame = frame_for(MessageId::GetStatusResponse, &[0x01, 0x00, 0x00, 0x00, 0x2A]);
    match frame.decode().expect("decode") {
        Message::GetStatusResponse(GetStatusResponse { status, data }) => {
            assert_eq!(status, 1);
            assert_eq!(data, 42);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn set_speed_request_survives_a_frame_trip() {
    let frame = frame_for(MessageId::SetSpeedRequest, &[0x00, 0x00, 0x03, 0xE8]);
    let message = frame.decode().expect("decode");
    assert_eq!(message, Message::SetSpeedRequest(SetSpeedRequest { speed: 1000 }));

    let rebuilt = Frame::from_message(&message, NodeId::GantryX, NodeId::Host).expect("encode");
    assert_eq!(rebuilt.payload(), frame.payload());
    assert_eq!(rebuilt.arbitration_id(), frame.arbitration_id());
}

#[test]
fn signed_fields_keep_their_sign() {
    let message = AddLinearMoveRequest {
        group_id: 3,
        seq_id: 1,
        duration: 250,
        velocity: -1,
        acceleration: -65_536,
    };
    let mut buffer = [0u8; AddLinearMoveRequest::SIZE];
    WireMessage::serialize(&message, &mut buffer).expect("serialize");
    assert_eq!(&buffer[6..10], &[0xFF, 0xFF, 0xFF, 0xFF]);
    assert_eq!(&buffer[10..14], &[0xFF, 0xFF, 0x00, 0x00]);
    assert_eq!(AddLinearMoveRequest::parse(&buffer).expect("parse"), message);
}

#[test]
fn wide_shapes_need_fd_frames() {
    // Shapes above eight bytes need CAN-FD.
    assert!(ReadPresenceSensingVoltageResponse::SIZE <= 8);
    assert!(AddLinearMoveRequest::SIZE > 8);
}

#[test]
fn function_codes_follow_message_role() {
    let stop = ArbitrationId::new(MessageId::StopRequest, NodeId::Broadcast, NodeId::Host);
    assert_eq!(stop.function_code, FunctionCode::NetworkManagement.raw());
    let status = ArbitrationId::new(MessageId::GetStatusResponse, NodeId::Host, NodeId::GantryY);
    assert_eq!(status.function_code, FunctionCode::Status.raw());
}

#[test]
fn unknown_message_ids_pass_through_as_empty() {
    let raw = ArbitrationId {
        function_code: FunctionCode::Command.raw(),
        node_id: NodeId::GantryX.raw(),
        originating_node_id: NodeId::Host.raw(),
        message_id: 0x1FF,
    }
    .raw();
    let frame = Frame::new(raw, &[9, 9, 9]).expect("frame");
    assert_eq!(frame.decode().expect("decode"), Message::Empty);
}
