//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Tool presence sensing from ADC bands."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Each tool mount carries an identification resistor; the voltage it pulls
//! its ADC channel to names the attached tool. The task answers host queries
//! and, on its poll interval or an explicit [`PresenceSensingTaskMessage::PollForChange`],
//! tells the host when what is attached changes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use nodebus_hal::AdcChannel;
use nodebus_msg::catalog::{ReadPresenceSensingVoltageResponse, ToolsDetectedNotification};
use nodebus_msg::{Message, NodeId};
use nodebus_rt::ShutdownSignal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{PresenceQueue, QUEUE_POLL};
use crate::clients::CanWriterClient;
use crate::messages::{CanWriterTaskMessage, PresenceSensingTaskMessage};

/// Tool identified on a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ToolType {
    /// Empty mount.
    Nothing = 0,
    /// Pipette attached.
    Pipette = 1,
    /// Gripper attached.
    Gripper = 2,
    /// Voltage outside every known band.
    Undefined = 3,
}

impl ToolType {
    /// Classify a mount voltage.
    pub fn from_millivolts(millivolts: u16) -> Self {
        match millivolts {
            0..=300 => ToolType::Nothing,
            1500..=2000 => ToolType::Pipette,
            2500..=3000 => ToolType::Gripper,
            _ => ToolType::Undefined,
        }
    }
}

/// The three sensed mounts.
#[derive(Clone)]
pub struct PresenceChannels {
    /// Z mount.
    pub z_motor: Arc<dyn AdcChannel>,
    /// A mount.
    pub a_motor: Arc<dyn AdcChannel>,
    /// Gripper mount.
    pub gripper: Arc<dyn AdcChannel>,
}

impl PresenceChannels {
    fn voltages(&self) -> ReadPresenceSensingVoltageResponse {
        ReadPresenceSensingVoltageResponse {
            z_motor: self.z_motor.read_millivolts(),
            a_motor: self.a_motor.read_millivolts(),
            gripper: self.gripper.read_millivolts(),
        }
    }

    fn detect(&self) -> ToolsDetectedNotification {
        let mv = self.voltages();
        ToolsDetectedNotification {
            z_motor: ToolType::from_millivolts(mv.z_motor) as u8,
            a_motor: ToolType::from_millivolts(mv.a_motor) as u8,
            gripper: ToolType::from_millivolts(mv.gripper) as u8,
        }
    }
}

/// Reports mount voltages and tool changes.
pub struct PresenceSensingTask<C> {
    queue: PresenceQueue,
    channels: PresenceChannels,
    poll_interval: Duration,
    node: NodeId,
    client: C,
    last_detected: Option<ToolsDetectedNotification>,
}

impl<C: CanWriterClient> PresenceSensingTask<C> {
    /// Channels are re-read every `poll_interval`; notifications go out as `node`.
    pub fn new(
        queue: PresenceQueue,
        channels: PresenceChannels,
        poll_interval: Duration,
        node: NodeId,
        client: C,
    ) -> Self {
        Self {
            queue,
            channels,
            poll_interval,
            node,
            client,
            last_detected: None,
        }
    }

    /// Serve the queue and poll for tool changes until `shutdown` triggers.
    pub fn run(mut self, shutdown: ShutdownSignal) -> Result<()> {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "presence sensing task started");
        let mut last_poll = Instant::now();
        while !shutdown.is_triggered() {
            if let Some(message) = self.queue.receive(QUEUE_POLL) {
                self.handle(message);
            }
            if last_poll.elapsed() >= self.poll_interval {
                self.handle(PresenceSensingTaskMessage::PollForChange);
                last_poll = Instant::now();
            }
        }
        Ok(())
    }

    pub(crate) fn handle(&mut self, message: PresenceSensingTaskMessage) {
        match message {
            PresenceSensingTaskMessage::ReadPresenceSensingVoltageRequest(_) => {
                self.send(self.channels.voltages());
            }
            PresenceSensingTaskMessage::AttachedToolsRequest(_) => {
                let detected = self.channels.detect();
                self.last_detected = Some(detected);
                self.send(detected);
            }
            PresenceSensingTaskMessage::PollForChange => {
                let detected = self.channels.detect();
                if self.last_detected != Some(detected) {
                    info!(
                        z_motor = detected.z_motor,
                        a_motor = detected.a_motor,
                        gripper = detected.gripper,
                        "attached tools changed"
                    );
                    self.last_detected = Some(detected);
                    self.send(detected);
                }
            }
        }
    }

    fn send(&self, message: impl Into<Message>) {
        if !self
            .client
            .send_can_writer_queue(CanWriterTaskMessage::reply_from(self.node, message))
        {
            warn!("presence sensing report dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodebus_hal::SimAdcChannel;
    use nodebus_msg::catalog::AttachedToolsRequest;

    use crate::tasks::testing::Recorder;

    #[test]
    fn bands_classify_tools() {
        assert_eq!(ToolType::from_millivolts(0), ToolType::Nothing);
        assert_eq!(ToolType::from_millivolts(300), ToolType::Nothing);
        assert_eq!(ToolType::from_millivolts(301), ToolType::Undefined);
        assert_eq!(ToolType::from_millivolts(1500), ToolType::Pipette);
        assert_eq!(ToolType::from_millivolts(2000), ToolType::Pipette);
        assert_eq!(ToolType::from_millivolts(2750), ToolType::Gripper);
        assert_eq!(ToolType::from_millivolts(3001), ToolType::Undefined);
    }

    fn notifications(recorder: &Recorder) -> Vec<Message> {
        recorder
            .take_written()
            .into_iter()
            .map(|CanWriterTaskMessage::Send { message, .. }| message)
            .collect()
    }

    #[test]
    fn polling_reports_only_changes() {
        let z = SimAdcChannel::new(1800);
        let a = SimAdcChannel::new(0);
        let gripper = SimAdcChannel::new(2700);
        let recorder = Arc::new(Recorder::default());
        let mut task = PresenceSensingTask::new(
            PresenceQueue::new(),
            PresenceChannels {
                z_motor: Arc::new(z),
                a_motor: Arc::new(a.clone()),
                gripper: Arc::new(gripper),
            },
            Duration::from_millis(500),
            NodeId::HeadLeft,
            Arc::clone(&recorder),
        );

        task.handle(AttachedToolsRequest {}.into());
        task.handle(PresenceSensingTaskMessage::PollForChange);
        a.set_millivolts(1600);
        task.handle(PresenceSensingTaskMessage::PollForChange);
        task.handle(PresenceSensingTaskMessage::PollForChange);

        assert_eq!(
            notifications(&recorder),
            vec![
                Message::ToolsDetectedNotification(ToolsDetectedNotification {
                    z_motor: 1,
                    a_motor: 0,
                    gripper: 2
                }),
                Message::ToolsDetectedNotification(ToolsDetectedNotification {
                    z_motor: 1,
                    a_motor: 1,
                    gripper: 2
                }),
            ]
        );
    }
}
