//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Task client traits and the queue-backed client."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use nodebus_rt::QueueHandle;
use tracing::warn;

use crate::messages::{
    CanWriterTaskMessage, EepromTaskMessage, MotorTaskMessage, MoveGroupTaskMessage,
    PresenceSensingTaskMessage,
};
use crate::move_group::AxisId;

/// Delivery into an axis' motor task.
pub trait MotorClient: Send + Sync {
    /// Queue `message` for `axis`. False when the axis has no task or its queue stays full.
    fn send_motor_queue(&self, axis: AxisId, message: MotorTaskMessage) -> bool;
}

/// Delivery into the move-group task.
pub trait MoveGroupClient: Send + Sync {
    /// Queue `message`; false when it could not be delivered.
    fn send_move_group_queue(&self, message: MoveGroupTaskMessage) -> bool;
}

/// Delivery into the EEPROM task.
pub trait EepromClient: Send + Sync {
    /// Queue `message`; false when it could not be delivered.
    fn send_eeprom_queue(&self, message: EepromTaskMessage) -> bool;
}

/// Delivery into the presence-sensing task.
pub trait PresenceSensingClient: Send + Sync {
    /// Queue `message`; false when it could not be delivered.
    fn send_presence_sensing_queue(&self, message: PresenceSensingTaskMessage) -> bool;
}

/// Delivery into the CAN writer task.
pub trait CanWriterClient: Send + Sync {
    /// Queue `message` for the bus; false when it could not be delivered.
    fn send_can_writer_queue(&self, message: CanWriterTaskMessage) -> bool;
}

/// Every task client at once.
pub trait TaskClient:
    MotorClient + MoveGroupClient + EepromClient + PresenceSensingClient + CanWriterClient
{
}

impl<T> TaskClient for T where
    T: MotorClient + MoveGroupClient + EepromClient + PresenceSensingClient + CanWriterClient
{
}

impl<T: MotorClient + ?Sized> MotorClient for Arc<T> {
    fn send_motor_queue(&self, axis: AxisId, message: MotorTaskMessage) -> bool {
        (**self).send_motor_queue(axis, message)
    }
}

impl<T: MoveGroupClient + ?Sized> MoveGroupClient for Arc<T> {
    fn send_move_group_queue(&self, message: MoveGroupTaskMessage) -> bool {
        (**self).send_move_group_queue(message)
    }
}

impl<T: EepromClient + ?Sized> EepromClient for Arc<T> {
    fn send_eeprom_queue(&self, message: EepromTaskMessage) -> bool {
        (**self).send_eeprom_queue(message)
    }
}

impl<T: PresenceSensingClient + ?Sized> PresenceSensingClient for Arc<T> {
    fn send_presence_sensing_queue(&self, message: PresenceSensingTaskMessage) -> bool {
        (**self).send_presence_sensing_queue(message)
    }
}

impl<T: CanWriterClient + ?Sized> CanWriterClient for Arc<T> {
    fn send_can_writer_queue(&self, message: CanWriterTaskMessage) -> bool {
        (**self).send_can_writer_queue(message)
    }
}

/// [`TaskClient`] backed by task queue handles.
///
/// Sends wait up to `send_timeout` for space. A task that was never attached
/// refuses every message.
#[derive(Debug, Clone)]
pub struct QueueClient {
    send_timeout: Duration,
    motors: BTreeMap<AxisId, QueueHandle<MotorTaskMessage>>,
    move_group: Option<QueueHandle<MoveGroupTaskMessage>>,
    eeprom: Option<QueueHandle<EepromTaskMessage>>,
    presence: Option<QueueHandle<PresenceSensingTaskMessage>>,
    can_writer: Option<QueueHandle<CanWriterTaskMessage>>,
}

impl QueueClient {
    /// Client with no task attached yet.
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            send_timeout,
            motors: BTreeMap::new(),
            move_group: None,
            eeprom: None,
            presence: None,
            can_writer: None,
        }
    }

    /// Attach the motor task of `axis`.
    pub fn with_motor(mut self, axis: AxisId, handle: QueueHandle<MotorTaskMessage>) -> Self {
        self.motors.insert(axis, handle);
        self
    }

    /// Attach the move-group task.
    pub fn with_move_group(mut self, handle: QueueHandle<MoveGroupTaskMessage>) -> Self {
        self.move_group = Some(handle);
        self
    }

    /// Attach the EEPROM task.
    pub fn with_eeprom(mut self, handle: QueueHandle<EepromTaskMessage>) -> Self {
        self.eeprom = Some(handle);
        self
    }

    /// Attach the presence-sensing task.
    pub fn with_presence_sensing(
        mut self,
        handle: QueueHandle<PresenceSensingTaskMessage>,
    ) -> Self {
        self.presence = Some(handle);
        self
    }

    /// Attach the CAN writer task.
    pub fn with_can_writer(mut self, handle: QueueHandle<CanWriterTaskMessage>) -> Self {
        self.can_writer = Some(handle);
        self
    }

    /// Axes with an attached motor task.
    pub fn axes(&self) -> impl Iterator<Item = AxisId> + '_ {
        self.motors.keys().copied()
    }

    fn deliver<M>(&self, task: &'static str, handle: Option<&QueueHandle<M>>, message: M) -> bool {
        let Some(handle) = handle else {
            warn!(task, "no queue attached, message dropped");
            return false;
        };
        let delivered = handle.send(message, self.send_timeout);
        if !delivered {
            warn!(
                task,
                depth = handle.len(),
                timeout_ms = self.send_timeout.as_millis() as u64,
                "task queue full"
            );
        }
        delivered
    }
}

impl MotorClient for QueueClient {
    fn send_motor_queue(&self, axis: AxisId, message: MotorTaskMessage) -> bool {
        self.deliver("motor", self.motors.get(&axis), message)
    }
}

impl MoveGroupClient for QueueClient {
    fn send_move_group_queue(&self, message: MoveGroupTaskMessage) -> bool {
        self.deliver("move_group", self.move_group.as_ref(), message)
    }
}

impl EepromClient for QueueClient {
    fn send_eeprom_queue(&self, message: EepromTaskMessage) -> bool {
        self.deliver("eeprom", self.eeprom.as_ref(), message)
    }
}

impl PresenceSensingClient for QueueClient {
    fn send_presence_sensing_queue(&self, message: PresenceSensingTaskMessage) -> bool {
        self.deliver("presence_sensing", self.presence.as_ref(), message)
    }
}

impl CanWriterClient for QueueClient {
    fn send_can_writer_queue(&self, message: CanWriterTaskMessage) -> bool {
        self.deliver("can_writer", self.can_writer.as_ref(), message)
    }
}
