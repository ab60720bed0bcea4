//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Per-axis motor task."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! One motor task runs per axis. It owns the axis' speed, position and
//! motion limits and shares its [`MotorPositionStatus`] with whoever holds
//! the node handle, including limit-switch interrupt handlers.
//!
//! Moves are simulated: a linear move advances the position by
//! `velocity * duration` as soon as its gate opens. Pulse timing belongs to
//! the stepper driver.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use nodebus_hal::{Gpio, PinConfig, RawBus};
use nodebus_msg::catalog::*;
use nodebus_msg::{ErrorCode, ErrorSeverity};
use nodebus_rt::ShutdownSignal;
use tracing::{debug, info, warn};

use super::{report_error, MotorQueue, PERIPHERAL_TIMEOUT, QUEUE_POLL};
use crate::clients::{CanWriterClient, MoveGroupClient};
use crate::messages::{CanWriterTaskMessage, MotorTaskMessage, MoveGroupTaskMessage};
use crate::motor_status::{MotorFlags, MotorPositionStatus};
use crate::move_group::{AxisId, GateOutcome, MoveDescriptor, ReleaseGate};

/// `ack_id` of a move that ran to completion.
pub const ACK_COMPLETED: u8 = 1;
/// `ack_id` of a move skipped because the limit switch had tripped.
pub const ACK_LIMIT_HIT: u8 = 2;

/// How long a released move waits for its group's gate.
const GATE_TIMEOUT: Duration = Duration::from_secs(1);

/// First byte bit marking a driver register write.
const DRIVER_WRITE_BIT: u8 = 0x80;

/// Peripherals wired to one axis.
#[derive(Clone)]
pub struct AxisHardware {
    /// Bus the motor driver sits on.
    pub driver: Arc<dyn RawBus>,
    /// Driver address on that bus.
    pub driver_address: u16,
    /// Driven high while the motor is enabled.
    pub enable_pin: PinConfig,
    /// Reads high while the limit switch is engaged.
    pub limit_pin: PinConfig,
}

impl std::fmt::Debug for AxisHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxisHardware")
            .field("driver_address", &self.driver_address)
            .field("enable_pin", &self.enable_pin)
            .field("limit_pin", &self.limit_pin)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct AxisState {
    speed: u32,
    position: i64,
    constraints: GetMotionConstraintsResponse,
}

/// Motion requests and released moves for one axis.
pub struct MotorTask<C> {
    axis: AxisId,
    queue: MotorQueue,
    status: Arc<MotorPositionStatus>,
    hardware: AxisHardware,
    gpio: Arc<dyn Gpio>,
    client: C,
    state: AxisState,
}

impl<C: MoveGroupClient + CanWriterClient> MotorTask<C> {
    /// Task for `axis` sharing `status` with the rest of the node.
    pub fn new(
        axis: AxisId,
        queue: MotorQueue,
        status: Arc<MotorPositionStatus>,
        hardware: AxisHardware,
        gpio: Arc<dyn Gpio>,
        client: C,
    ) -> Self {
        Self {
            axis,
            queue,
            status,
            hardware,
            gpio,
            client,
            state: AxisState::default(),
        }
    }

    /// Serve the queue until `shutdown` triggers.
    pub fn run(mut self, shutdown: ShutdownSignal) -> Result<()> {
        info!(axis = ?self.axis, "motor task started");
        while !shutdown.is_triggered() {
            if let Some(message) = self.queue.receive(QUEUE_POLL) {
                self.handle(message);
            }
        }
        Ok(())
    }

    fn reply(&self, message: impl Into<nodebus_msg::Message>) {
        if !self
            .client
            .send_can_writer_queue(CanWriterTaskMessage::reply_from(self.axis, message))
        {
            warn!(axis = ?self.axis, "reply dropped");
        }
    }

    fn hardware_fault(&self, operation: &'static str) {
        warn!(axis = ?self.axis, operation, "motor driver transfer failed");
        report_error(
            &self.client,
            self.axis,
            ErrorSeverity::Recoverable,
            ErrorCode::HardwareFault,
        );
    }

    /// The top bit of the command byte selects a write, so only 7-bit
    /// register addresses reach the driver.
    fn check_register(&self, reg_address: u8) -> bool {
        if reg_address & DRIVER_WRITE_BIT == 0 {
            return true;
        }
        warn!(axis = ?self.axis, reg_address, "driver register address out of range");
        report_error(
            &self.client,
            self.axis,
            ErrorSeverity::Recoverable,
            ErrorCode::InvalidRegister,
        );
        false
    }

    pub(crate) fn handle(&mut self, message: MotorTaskMessage) {
        match message {
            MotorTaskMessage::StopRequest(_) => {
                self.status.finish_motion();
                debug!(axis = ?self.axis, "stopped");
            }
            MotorTaskMessage::GetStatusRequest(_) => self.reply(GetStatusResponse {
                status: self.status.wire_status(),
                data: self.state.position as u32,
            }),
            MotorTaskMessage::SetSpeedRequest(SetSpeedRequest { speed }) => {
                self.state.speed = speed;
            }
            MotorTaskMessage::GetSpeedRequest(_) => self.reply(GetSpeedResponse {
                speed: self.state.speed,
            }),
            MotorTaskMessage::EnableMotorRequest(_) => {
                self.gpio.set_pin(self.hardware.enable_pin);
                // Re-enabling acknowledges a tripped limit switch.
                self.status.reset_flag(MotorFlags::LIMIT_HIT);
                self.status.set_flag(MotorFlags::STEPPER_POSITION_OK);
                info!(axis = ?self.axis, "motor enabled");
            }
            MotorTaskMessage::DisableMotorRequest(_) => {
                self.gpio.clear_pin(self.hardware.enable_pin);
                self.status.finish_motion();
                self.status.clear_flag(MotorFlags::STEPPER_POSITION_OK);
                info!(axis = ?self.axis, "motor disabled");
            }
            MotorTaskMessage::MoveRequest(MoveRequest { steps }) => {
                if self.status.check_flag(MotorFlags::LIMIT_HIT) {
                    warn!(axis = ?self.axis, steps, "limit switch tripped, move ignored");
                    return;
                }
                self.status.start_motion();
                self.state.position = self.state.position.wrapping_add(i64::from(steps));
                self.status.finish_motion();
            }
            MotorTaskMessage::SetMotionConstraints(limits) => {
                self.state.constraints = GetMotionConstraintsResponse {
                    min_velocity: limits.min_velocity,
                    max_velocity: limits.max_velocity,
                    min_acceleration: limits.min_acceleration,
                    max_acceleration: limits.max_acceleration,
                };
            }
            MotorTaskMessage::GetMotionConstraintsRequest(_) => self.reply(self.state.constraints),
            MotorTaskMessage::ReadLimitSwitchRequest(_) => {
                let engaged = self.gpio.is_pin_set(self.hardware.limit_pin);
                self.reply(ReadLimitSwitchResponse {
                    switch_status: u8::from(engaged),
                });
            }
            MotorTaskMessage::WriteMotorDriverRegister(WriteMotorDriverRegister {
                reg_address,
                data,
            }) => {
                if !self.check_register(reg_address) {
                    return;
                }
                let mut command = [0u8; 5];
                command[0] = reg_address | DRIVER_WRITE_BIT;
                command[1..].copy_from_slice(&data.to_be_bytes());
                if !self.hardware.driver.transmit(
                    self.hardware.driver_address,
                    &command,
                    PERIPHERAL_TIMEOUT,
                ) {
                    self.hardware_fault("register write");
                }
            }
            MotorTaskMessage::ReadMotorDriverRegister(ReadMotorDriverRegister { reg_address }) => {
                if !self.check_register(reg_address) {
                    return;
                }
                match self.read_register(reg_address) {
                    Some(data) => self.reply(ReadMotorDriverRegisterResponse { reg_address, data }),
                    None => self.hardware_fault("register read"),
                }
            }
            MotorTaskMessage::ExecuteMove {
                group_id,
                descriptor,
                gate,
            } => self.execute_move(group_id, descriptor, &gate),
        }
    }

    fn read_register(&self, reg_address: u8) -> Option<u32> {
        let driver = &self.hardware.driver;
        let address = self.hardware.driver_address;
        let mut value = [0u8; 4];
        let ok = driver.transmit(address, &[reg_address], PERIPHERAL_TIMEOUT)
            && driver.receive(address, &mut value, PERIPHERAL_TIMEOUT);
        ok.then(|| u32::from_be_bytes(value))
    }

    fn execute_move(&mut self, group_id: u8, descriptor: MoveDescriptor, gate: &ReleaseGate) {
        match gate.wait(GATE_TIMEOUT) {
            GateOutcome::Released => {}
            GateOutcome::Cancelled => {
                debug!(axis = ?self.axis, group_id, "group cancelled before release");
                return;
            }
            GateOutcome::TimedOut => {
                warn!(axis = ?self.axis, group_id, "release gate timed out, move dropped");
                return;
            }
        }

        let ack_id = if self.status.check_flag(MotorFlags::LIMIT_HIT) {
            warn!(axis = ?self.axis, group_id, "limit switch tripped, move skipped");
            ACK_LIMIT_HIT
        } else {
            self.status.start_motion();
            let travel =
                i64::from(descriptor.velocity).wrapping_mul(i64::from(descriptor.duration));
            self.state.position = self.state.position.wrapping_add(travel);
            self.status.finish_motion();
            ACK_COMPLETED
        };
        debug!(
            axis = ?self.axis,
            group_id,
            seq_id = descriptor.seq_id,
            position = self.state.position,
            "move finished"
        );

        self.reply(MoveCompleted {
            group_id,
            seq_id: descriptor.seq_id,
            current_position: self.state.position as u32,
            ack_id,
        });
        let completed = MoveGroupTaskMessage::AxisCompleted {
            group_id,
            axis: self.axis,
        };
        if !self.client.send_move_group_queue(completed) {
            warn!(axis = ?self.axis, group_id, "completion not delivered to move group task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodebus_hal::{SimGpio, SimRegisterDevice};
    use nodebus_msg::{Message, NodeId};

    use crate::move_group::MoveGroupCoordinator;
    use crate::tasks::testing::Recorder;

    const AXIS: AxisId = NodeId::GantryX;

    struct Bench {
        task: MotorTask<Arc<Recorder>>,
        recorder: Arc<Recorder>,
        status: Arc<MotorPositionStatus>,
        gpio: Arc<SimGpio>,
        driver: Arc<SimRegisterDevice>,
    }

    fn bench() -> Bench {
        let recorder = Arc::new(Recorder::default());
        let status = Arc::new(MotorPositionStatus::new());
        let gpio = Arc::new(SimGpio::new());
        let driver = Arc::new(SimRegisterDevice::new(0x10));
        let hardware = AxisHardware {
            driver: driver.clone(),
            driver_address: 0x10,
            enable_pin: PinConfig::new(0, 0),
            limit_pin: PinConfig::new(1, 0),
        };
        let task = MotorTask::new(
            AXIS,
            MotorQueue::new(),
            Arc::clone(&status),
            hardware,
            gpio.clone(),
            Arc::clone(&recorder),
        );
        Bench {
            task,
            recorder,
            status,
            gpio,
            driver,
        }
    }

    fn replies(recorder: &Recorder) -> Vec<Message> {
        recorder
            .take_written()
            .into_iter()
            .map(|CanWriterTaskMessage::Send { message, .. }| message)
            .collect()
    }

    fn released_move(velocity: i32, duration: u32) -> (u8, MoveDescriptor, ReleaseGate) {
        let coordinator = MoveGroupCoordinator::new(1, vec![AXIS], vec![AXIS]);
        let descriptor = MoveDescriptor {
            seq_id: 4,
            duration,
            velocity,
            acceleration: 0,
        };
        coordinator.add_move(0, AXIS, descriptor).expect("add");
        coordinator.arm(0).expect("arm");
        let mut handed = None;
        coordinator
            .execute(0, |_, mv, gate| {
                handed = Some((mv, gate));
                true
            })
            .expect("execute");
        let (mv, gate) = handed.expect("hand-off");
        (0, mv, gate)
    }

    #[test]
    fn speed_and_status_round_trip() {
        let mut b = bench();
        b.task.handle(SetSpeedRequest { speed: 1000 }.into());
        b.task.handle(GetSpeedRequest {}.into());
        b.task.handle(MoveRequest { steps: 42 }.into());
        b.task.handle(GetStatusRequest {}.into());
        assert_eq!(
            replies(&b.recorder),
            vec![
                Message::GetSpeedResponse(GetSpeedResponse { speed: 1000 }),
                Message::GetStatusResponse(GetStatusResponse {
                    status: MotorFlags::STOPPED.bits() as u8,
                    data: 42
                }),
            ]
        );
    }

    #[test]
    fn enable_drives_the_pin_and_clears_the_latch() {
        let mut b = bench();
        b.status.on_limit_switch_interrupt();
        b.task.handle(EnableMotorRequest {}.into());
        assert!(b.gpio.level(0, 0));
        assert!(!b.status.check_flag(MotorFlags::LIMIT_HIT));

        b.task.handle(DisableMotorRequest {}.into());
        assert!(!b.gpio.level(0, 0));
    }

    #[test]
    fn driver_registers_go_through_the_raw_bus() {
        let mut b = bench();
        b.task.handle(
            WriteMotorDriverRegister {
                reg_address: 0x6C,
                data: 0x0001_0005,
            }
            .into(),
        );
        assert_eq!(b.driver.register(0x6C), 0x0001_0005);

        b.driver.set_register(0x01, 77);
        b.task.handle(ReadMotorDriverRegister { reg_address: 0x01 }.into());
        assert_eq!(
            replies(&b.recorder),
            vec![Message::ReadMotorDriverRegisterResponse(
                ReadMotorDriverRegisterResponse {
                    reg_address: 0x01,
                    data: 77
                }
            )]
        );
    }

    #[test]
    fn register_addresses_with_the_write_bit_are_refused() {
        let mut b = bench();
        b.driver.set_register(0x05, 9);
        b.task.handle(
            WriteMotorDriverRegister {
                reg_address: 0x85,
                data: 0xFFFF_FFFF,
            }
            .into(),
        );
        b.task.handle(ReadMotorDriverRegister { reg_address: 0x85 }.into());
        assert_eq!(b.driver.register(0x05), 9);
        let refused = Message::ErrorMessage(ErrorMessage::new(
            ErrorSeverity::Recoverable,
            ErrorCode::InvalidRegister,
        ));
        assert_eq!(replies(&b.recorder), vec![refused, refused]);
    }

    #[test]
    fn limit_switch_state_comes_from_gpio() {
        let mut b = bench();
        b.gpio.set_pin(PinConfig::new(1, 0));
        b.task.handle(ReadLimitSwitchRequest {}.into());
        assert_eq!(
            replies(&b.recorder),
            vec![Message::ReadLimitSwitchResponse(ReadLimitSwitchResponse {
                switch_status: 1
            })]
        );
    }

    #[test]
    fn released_moves_advance_and_report() {
        let mut b = bench();
        let (group_id, descriptor, gate) = released_move(-5, 100);
        b.task.handle(MotorTaskMessage::ExecuteMove {
            group_id,
            descriptor,
            gate,
        });
        assert_eq!(
            replies(&b.recorder),
            vec![Message::MoveCompleted(MoveCompleted {
                group_id,
                seq_id: 4,
                current_position: (-500i64) as u32,
                ack_id: ACK_COMPLETED,
            })]
        );
        assert!(matches!(
            b.recorder.move_group.lock().as_slice(),
            [MoveGroupTaskMessage::AxisCompleted { group_id: 0, axis: AXIS }]
        ));
        assert!(b.status.check_flag(MotorFlags::STOPPED));
    }

    #[test]
    fn tripped_limit_skips_the_move() {
        let mut b = bench();
        b.status.on_limit_switch_interrupt();
        let (group_id, descriptor, gate) = released_move(10, 10);
        b.task.handle(MotorTaskMessage::ExecuteMove {
            group_id,
            descriptor,
            gate,
        });
        assert_eq!(
            replies(&b.recorder),
            vec![Message::MoveCompleted(MoveCompleted {
                group_id,
                seq_id: 4,
                current_position: 0,
                ack_id: ACK_LIMIT_HIT,
            })]
        );
    }
}
