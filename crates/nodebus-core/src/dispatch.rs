//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Routing of decoded bus messages to their handlers."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Decoded messages are routed by shape. Axis requests go to the motor task
//! named by the destination node, or to every local axis for broadcast;
//! node-level requests are delivered once. Responses and unknown frames
//! belong to other nodes and are dropped.

use nodebus_msg::{Message, NodeId};
use thiserror::Error;
use tracing::trace;

use crate::clients::TaskClient;
use crate::handlers::{
    EepromHandler, MotionHandler, MoveGroupHandler, PresenceSensingHandler, SystemHandler,
};
use crate::move_group::AxisId;

/// Why a message did not reach its task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The destination is neither the node nor one of its axes.
    #[error("{0:?} is not served by this node")]
    NotAddressed(NodeId),
    /// The owning task did not accept the request in time.
    #[error("{task} queue refused {message}")]
    QueueRefused {
        /// Task that owns the queue.
        task: &'static str,
        /// Name of the refused message.
        message: &'static str,
    },
}

/// Routes messages addressed to this node.
#[derive(Debug, Clone)]
pub struct Dispatcher<C> {
    axes: Vec<AxisId>,
    motion: MotionHandler<C>,
    move_group: MoveGroupHandler<C>,
    eeprom: EepromHandler<C>,
    presence: PresenceSensingHandler<C>,
    system: SystemHandler<C>,
}

impl<C: TaskClient + Clone> Dispatcher<C> {
    /// `axes` are the node ids this node answers to; the first is its own address.
    pub fn new(client: C, axes: Vec<AxisId>, firmware_version: u32) -> Self {
        Self {
            axes,
            motion: MotionHandler::new(client.clone()),
            move_group: MoveGroupHandler::new(client.clone()),
            eeprom: EepromHandler::new(client.clone()),
            presence: PresenceSensingHandler::new(client.clone()),
            system: SystemHandler::new(client, firmware_version),
        }
    }

    fn targets(&self, target: NodeId) -> Result<Vec<AxisId>, DispatchError> {
        if target == NodeId::Broadcast {
            Ok(self.axes.clone())
        } else if self.axes.contains(&target) {
            Ok(vec![target])
        } else {
            Err(DispatchError::NotAddressed(target))
        }
    }

    /// Deliver `message` sent to `target`. Returns how many queue
    /// deliveries were made; zero when the message is not for a task.
    pub fn dispatch(&self, target: NodeId, message: Message) -> Result<usize, DispatchError> {
        let axes = self.targets(target)?;
        let name = message.name();
        // Node-level replies come from the addressed axis, or the node's own
        // address for broadcast.
        let responder = axes.first().copied().unwrap_or(target);

        let per_axis = |task: &'static str, deliver: &dyn Fn(AxisId) -> bool| {
            let mut delivered = 0;
            let mut refused = false;
            for &axis in &axes {
                if deliver(axis) {
                    delivered += 1;
                } else {
                    refused = true;
                }
            }
            if refused {
                Err(DispatchError::QueueRefused {
                    task,
                    message: name,
                })
            } else {
                Ok(delivered)
            }
        };
        let once = |task: &'static str, delivered: bool| {
            if delivered {
                Ok(1)
            } else {
                Err(DispatchError::QueueRefused {
                    task,
                    message: name,
                })
            }
        };

        match message {
            Message::StopRequest(m) => per_axis("motor", &|axis| self.motion.handle(axis, m)),
            Message::GetStatusRequest(m) => per_axis("motor", &|axis| self.motion.handle(axis, m)),
            Message::SetSpeedRequest(m) => per_axis("motor", &|axis| self.motion.handle(axis, m)),
            Message::GetSpeedRequest(m) => per_axis("motor", &|axis| self.motion.handle(axis, m)),
            Message::EnableMotorRequest(m) => {
                per_axis("motor", &|axis| self.motion.handle(axis, m))
            }
            Message::DisableMotorRequest(m) => {
                per_axis("motor", &|axis| self.motion.handle(axis, m))
            }
            Message::MoveRequest(m) => per_axis("motor", &|axis| self.motion.handle(axis, m)),
            Message::SetMotionConstraints(m) => {
                per_axis("motor", &|axis| self.motion.handle(axis, m))
            }
            Message::GetMotionConstraintsRequest(m) => {
                per_axis("motor", &|axis| self.motion.handle(axis, m))
            }
            Message::ReadLimitSwitchRequest(m) => {
                per_axis("motor", &|axis| self.motion.handle(axis, m))
            }
            Message::WriteMotorDriverRegister(m) => {
                per_axis("motor", &|axis| self.motion.handle(axis, m))
            }
            Message::ReadMotorDriverRegister(m) => {
                per_axis("motor", &|axis| self.motion.handle(axis, m))
            }
            Message::AddLinearMoveRequest(m) => {
                per_axis("move_group", &|axis| self.move_group.add_linear_move(axis, m))
            }
            Message::GetMoveGroupRequest(m) => once("move_group", self.move_group.handle(m)),
            Message::ExecuteMoveGroupRequest(m) => once("move_group", self.move_group.handle(m)),
            Message::ClearAllMoveGroupsRequest(m) => {
                once("move_group", self.move_group.handle(m))
            }
            Message::WriteToEepromRequest(m) => once("eeprom", self.eeprom.handle(m)),
            Message::ReadFromEepromRequest(m) => once("eeprom", self.eeprom.handle(m)),
            Message::ReadPresenceSensingVoltageRequest(m) => {
                once("presence_sensing", self.presence.handle(m))
            }
            Message::AttachedToolsRequest(m) => once("presence_sensing", self.presence.handle(m)),
            Message::HeartbeatRequest(m) => {
                once("can_writer", self.system.handle_heartbeat(responder, m))
            }
            Message::DeviceInfoRequest(m) => {
                once("can_writer", self.system.handle_device_info(responder, m))
            }
            Message::ErrorMessage(_)
            | Message::GetStatusResponse(_)
            | Message::GetSpeedResponse(_)
            | Message::MoveCompleted(_)
            | Message::GetMoveGroupResponse(_)
            | Message::ReadLimitSwitchResponse(_)
            | Message::ReadMotorDriverRegisterResponse(_)
            | Message::GetMotionConstraintsResponse(_)
            | Message::ReadFromEepromResponse(_)
            | Message::DeviceInfoResponse(_)
            | Message::HeartbeatResponse(_)
            | Message::ReadPresenceSensingVoltageResponse(_)
            | Message::ToolsDetectedNotification(_)
            | Message::Empty => {
                trace!(message = name, ?target, "not a request, ignored");
                Ok(0)
            }
        }
    }
}
