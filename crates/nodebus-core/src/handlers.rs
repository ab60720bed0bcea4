//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Per-subsystem handlers forwarding bus requests to task queues."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Handlers are thin: each holds a client and turns one decoded request into
//! one queue delivery. Only [`SystemHandler`] answers on its own, since
//! heartbeat and device information need no task state.

use nodebus_msg::catalog::{
    AddLinearMoveRequest, DeviceInfoRequest, DeviceInfoResponse, HeartbeatRequest,
    HeartbeatResponse,
};
use nodebus_msg::NodeId;

use crate::clients::{
    CanWriterClient, EepromClient, MotorClient, MoveGroupClient, PresenceSensingClient,
};
use crate::messages::{
    CanWriterTaskMessage, EepromTaskMessage, MotorTaskMessage, MoveGroupTaskMessage,
    PresenceSensingTaskMessage,
};
use crate::move_group::AxisId;

/// Motion requests for one axis.
#[derive(Debug, Clone)]
pub struct MotionHandler<C> {
    client: C,
}

impl<C: MotorClient> MotionHandler<C> {
    /// Handler delivering through `client`.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Forward `request` to the motor task of `axis`.
    pub fn handle(&self, axis: AxisId, request: impl Into<MotorTaskMessage>) -> bool {
        self.client.send_motor_queue(axis, request.into())
    }
}

/// Move-group requests for the whole node.
#[derive(Debug, Clone)]
pub struct MoveGroupHandler<C> {
    client: C,
}

impl<C: MoveGroupClient> MoveGroupHandler<C> {
    /// Handler delivering through `client`.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Forward `request` to the move-group task.
    pub fn handle(&self, request: impl Into<MoveGroupTaskMessage>) -> bool {
        self.client.send_move_group_queue(request.into())
    }

    /// Linear moves are per axis, so the target axis travels with the request.
    pub fn add_linear_move(&self, axis: AxisId, request: AddLinearMoveRequest) -> bool {
        self.client
            .send_move_group_queue(MoveGroupTaskMessage::AddLinearMove { axis, request })
    }
}

/// EEPROM reads and writes.
#[derive(Debug, Clone)]
pub struct EepromHandler<C> {
    client: C,
}

impl<C: EepromClient> EepromHandler<C> {
    /// Handler delivering through `client`.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Forward `request` to the EEPROM task.
    pub fn handle(&self, request: impl Into<EepromTaskMessage>) -> bool {
        self.client.send_eeprom_queue(request.into())
    }
}

/// Tool presence queries.
#[derive(Debug, Clone)]
pub struct PresenceSensingHandler<C> {
    client: C,
}

impl<C: PresenceSensingClient> PresenceSensingHandler<C> {
    /// Handler delivering through `client`.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Forward `request` to the presence-sensing task.
    pub fn handle(&self, request: impl Into<PresenceSensingTaskMessage>) -> bool {
        self.client.send_presence_sensing_queue(request.into())
    }
}

/// Heartbeat and device information, answered straight to the host.
#[derive(Debug, Clone)]
pub struct SystemHandler<C> {
    client: C,
    firmware_version: u32,
}

impl<C: CanWriterClient> SystemHandler<C> {
    /// `firmware_version` is reported in every [`DeviceInfoResponse`].
    pub fn new(client: C, firmware_version: u32) -> Self {
        Self {
            client,
            firmware_version,
        }
    }

    /// Answer a heartbeat on behalf of `responder`.
    pub fn handle_heartbeat(&self, responder: NodeId, _request: HeartbeatRequest) -> bool {
        self.client
            .send_can_writer_queue(CanWriterTaskMessage::reply_from(
                responder,
                HeartbeatResponse {},
            ))
    }

    /// Report the firmware version on behalf of `responder`.
    pub fn handle_device_info(&self, responder: NodeId, _request: DeviceInfoRequest) -> bool {
        self.client.send_can_writer_queue(CanWriterTaskMessage::reply_from(
            responder,
            DeviceInfoResponse {
                version: self.firmware_version,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodebus_msg::Message;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<CanWriterTaskMessage>>,
    }

    impl CanWriterClient for Recorder {
        fn send_can_writer_queue(&self, message: CanWriterTaskMessage) -> bool {
            self.sent.lock().push(message);
            true
        }
    }

    #[test]
    fn device_info_reports_firmware_version() {
        let handler = SystemHandler::new(Recorder::default(), 7);
        assert!(handler.handle_device_info(NodeId::GantryX, DeviceInfoRequest {}));
        let sent = handler.client.sent.lock();
        assert_eq!(
            sent.as_slice(),
            &[CanWriterTaskMessage::Send {
                destination: NodeId::Host,
                origin: Some(NodeId::GantryX),
                message: Message::DeviceInfoResponse(DeviceInfoResponse { version: 7 }),
            }]
        );
    }
}
