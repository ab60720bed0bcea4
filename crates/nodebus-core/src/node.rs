//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Node composition: queues, clients, dispatcher and task threads."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Composition root for one node.
//!
//! [`Node::spawn`] wires every queue into a shared [`QueueClient`], builds
//! the [`Dispatcher`] for the CAN reader and starts one thread per task.
//! Hardware arrives through [`NodeHardware`], so the same composition runs
//! against real peripherals or the simulated set from
//! [`NodeHardware::simulated`].

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use nodebus_can::{BusMetricsExporter, BusTransport, LoopbackHub, SocketBus};
use nodebus_common::{AppConfig, TransportKind};
use nodebus_hal::{
    Gpio, PinConfig, RawBus, SimAdcChannel, SimGpio, SimMemoryDevice, SimRegisterDevice,
};
use nodebus_msg::NodeId;
use nodebus_rt::{ShutdownSignal, TaskSet};
use prometheus::Registry;
use tracing::{error, info};

use crate::clients::QueueClient;
use crate::dispatch::Dispatcher;
use crate::motor_status::MotorPositionStatus;
use crate::move_group::{AxisId, MoveGroupCoordinator};
use crate::tasks::motor::AxisHardware;
use crate::tasks::{
    CanReader, CanWriter, CanWriterQueue, EepromQueue, EepromTask, MotorQueue, MotorTask,
    MoveGroupQueue, MoveGroupTask, PresenceChannels, PresenceQueue, PresenceSensingTask,
};

/// First SPI select address of the simulated motor drivers; axis `i` uses `base + i`.
pub const SIM_DRIVER_BASE_ADDRESS: u16 = 0x10;

/// Enable and limit-switch pins of the `index`-th axis on simulated boards.
pub const fn sim_axis_pins(index: u8) -> (PinConfig, PinConfig) {
    (PinConfig::new(0, index), PinConfig::new(1, index))
}

/// Peripherals a node drives.
#[derive(Clone)]
pub struct NodeHardware {
    /// Driver and pins per axis.
    pub axes: BTreeMap<AxisId, AxisHardware>,
    /// Enable and limit-switch pins.
    pub gpio: Arc<dyn Gpio>,
    /// Bus the EEPROM sits on.
    pub eeprom: Arc<dyn RawBus>,
    /// Mount voltage channels.
    pub presence: PresenceChannels,
}

/// Handles onto the simulated peripherals behind a [`NodeHardware`].
pub struct SimulatedHardware {
    /// Simulated pin bank.
    pub gpio: Arc<SimGpio>,
    /// Simulated EEPROM.
    pub eeprom: Arc<SimMemoryDevice>,
    /// Simulated motor driver of each axis.
    pub drivers: BTreeMap<AxisId, Arc<SimRegisterDevice>>,
    /// Z mount voltage.
    pub z_motor: SimAdcChannel,
    /// A mount voltage.
    pub a_motor: SimAdcChannel,
    /// Gripper mount voltage.
    pub gripper: SimAdcChannel,
}

impl NodeHardware {
    /// Simulated peripherals for every axis in `config`.
    pub fn simulated(config: &AppConfig) -> (Self, SimulatedHardware) {
        let gpio = Arc::new(SimGpio::new());
        let eeprom = Arc::new(SimMemoryDevice::new(config.node.eeprom_address));
        let z_motor = SimAdcChannel::new(0);
        let a_motor = SimAdcChannel::new(0);
        let gripper = SimAdcChannel::new(0);

        let mut axes = BTreeMap::new();
        let mut drivers = BTreeMap::new();
        for (index, axis) in config.node.axes.iter().enumerate() {
            let index = index as u8;
            let driver_address = SIM_DRIVER_BASE_ADDRESS + u16::from(index);
            let driver = Arc::new(SimRegisterDevice::new(driver_address));
            let (enable_pin, limit_pin) = sim_axis_pins(index);
            axes.insert(
                *axis,
                AxisHardware {
                    driver: driver.clone(),
                    driver_address,
                    enable_pin,
                    limit_pin,
                },
            );
            drivers.insert(*axis, driver);
        }

        let hardware = NodeHardware {
            axes,
            gpio: gpio.clone(),
            eeprom: eeprom.clone(),
            presence: PresenceChannels {
                z_motor: Arc::new(z_motor.clone()),
                a_motor: Arc::new(a_motor.clone()),
                gripper: Arc::new(gripper.clone()),
            },
        };
        let handles = SimulatedHardware {
            gpio,
            eeprom,
            drivers,
            z_motor,
            a_motor,
            gripper,
        };
        (hardware, handles)
    }
}

/// Open the transport selected by `[can]`. Loopback endpoints attach to `hub`.
pub fn open_transport(config: &AppConfig, hub: &LoopbackHub) -> Result<Arc<dyn BusTransport>> {
    let options = config.can.bus_options();
    match config.can.transport {
        TransportKind::Loopback => Ok(Arc::new(hub.open(options, config.can.loopback_echo))),
        TransportKind::Socket => {
            let addr = config
                .can
                .socket_addr
                .ok_or_else(|| anyhow!("[can] socket transport requires socket_addr"))?;
            let bus = SocketBus::open(addr, options)
                .with_context(|| format!("failed to join simulated bus at {addr}"))?;
            Ok(Arc::new(bus))
        }
    }
}

/// Entry point for starting a node; see [`Node::spawn`].
pub struct Node;

impl Node {
    /// Start every task of a node on `transport`.
    pub fn spawn(
        config: &AppConfig,
        transport: Arc<dyn BusTransport>,
        hardware: NodeHardware,
    ) -> Result<NodeHandle> {
        config.validate()?;
        let filters = config.filter_set()?;
        let node = config.node.primary();
        let axes = config.node.axes.clone();

        let registry = Registry::new();
        let metrics =
            BusMetricsExporter::register(&registry).context("failed to register bus metrics")?;

        let motor_queues: Vec<(AxisId, MotorQueue)> =
            axes.iter().map(|axis| (*axis, MotorQueue::new())).collect();
        let move_group_queue = MoveGroupQueue::new();
        let eeprom_queue = EepromQueue::new();
        let presence_queue = PresenceQueue::new();
        let writer_queue = CanWriterQueue::new();

        let client = motor_queues
            .iter()
            .fold(
                QueueClient::new(config.tasks.queue_send_timeout),
                |client, (axis, queue)| client.with_motor(*axis, queue.handle()),
            )
            .with_move_group(move_group_queue.handle())
            .with_eeprom(eeprom_queue.handle())
            .with_presence_sensing(presence_queue.handle())
            .with_can_writer(writer_queue.handle());
        let client = Arc::new(client);

        let coordinator = Arc::new(MoveGroupCoordinator::new(
            config.move_group.max_groups,
            axes.clone(),
            config.expected_axes(),
        ));
        let statuses: BTreeMap<AxisId, Arc<MotorPositionStatus>> = axes
            .iter()
            .map(|axis| (*axis, Arc::new(MotorPositionStatus::new())))
            .collect();

        let shutdown = ShutdownSignal::new();
        let mut tasks = TaskSet::new();
        let started = (|| -> Result<()> {
            for (axis, queue) in motor_queues {
                let axis_hardware = hardware
                    .axes
                    .get(&axis)
                    .cloned()
                    .with_context(|| format!("no hardware wired for axis {axis:?}"))?;
                let status = statuses
                    .get(&axis)
                    .cloned()
                    .with_context(|| format!("no status word for axis {axis:?}"))?;
                let task = MotorTask::new(
                    axis,
                    queue,
                    status,
                    axis_hardware,
                    Arc::clone(&hardware.gpio),
                    Arc::clone(&client),
                );
                let signal = shutdown.clone();
                tasks.spawn(format!("motor-{axis:?}"), move || task.run(signal))?;
            }

            let task = MoveGroupTask::new(
                move_group_queue,
                Arc::clone(&coordinator),
                node,
                Arc::clone(&client),
            );
            let signal = shutdown.clone();
            tasks.spawn("move-group", move || task.run(signal))?;

            let task = EepromTask::new(
                eeprom_queue,
                Arc::clone(&hardware.eeprom),
                config.node.eeprom_address,
                node,
                Arc::clone(&client),
            );
            let signal = shutdown.clone();
            tasks.spawn("eeprom", move || task.run(signal))?;

            let task = PresenceSensingTask::new(
                presence_queue,
                hardware.presence.clone(),
                config.tasks.presence_poll_interval,
                node,
                Arc::clone(&client),
            );
            let signal = shutdown.clone();
            tasks.spawn("presence-sensing", move || task.run(signal))?;

            let task = CanWriter::new(Arc::clone(&transport), writer_queue, node, metrics.clone());
            let signal = shutdown.clone();
            tasks.spawn("can-writer", move || task.run(signal))?;

            let dispatcher = Dispatcher::new(
                Arc::clone(&client),
                axes.clone(),
                config.node.firmware_version,
            );
            let task = CanReader::new(Arc::clone(&transport), filters, dispatcher, metrics.clone());
            let signal = shutdown.clone();
            tasks.spawn("can-reader", move || task.run(signal))?;
            Ok(())
        })();

        if let Err(err) = started {
            error!(error = %err, "node failed to start, stopping started tasks");
            shutdown.trigger();
            transport.close();
            if let Err(join_err) = tasks.join() {
                error!(error = %join_err, "task failed while aborting start-up");
            }
            return Err(err);
        }

        info!(
            ?node,
            axes = axes.len(),
            tasks = tasks.len(),
            transport = transport.name(),
            "node started"
        );
        Ok(NodeHandle {
            node,
            shutdown,
            tasks,
            transport,
            client,
            coordinator,
            statuses,
            metrics,
            registry,
        })
    }
}

/// Running node.
pub struct NodeHandle {
    node: NodeId,
    shutdown: ShutdownSignal,
    tasks: TaskSet,
    transport: Arc<dyn BusTransport>,
    client: Arc<QueueClient>,
    coordinator: Arc<MoveGroupCoordinator>,
    statuses: BTreeMap<AxisId, Arc<MotorPositionStatus>>,
    metrics: BusMetricsExporter,
    registry: Registry,
}

impl NodeHandle {
    /// The node's own address.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Status word of `axis`, shared with its motor task.
    pub fn motor_status(&self, axis: AxisId) -> Option<Arc<MotorPositionStatus>> {
        self.statuses.get(&axis).cloned()
    }

    /// Move groups shared by the node's tasks.
    pub fn coordinator(&self) -> &Arc<MoveGroupCoordinator> {
        &self.coordinator
    }

    /// Client for injecting task messages directly.
    pub fn client(&self) -> Arc<QueueClient> {
        Arc::clone(&self.client)
    }

    /// Bus counters of this node.
    pub fn metrics(&self) -> &BusMetricsExporter {
        &self.metrics
    }

    /// Prometheus registry holding [`NodeHandle::metrics`].
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Signal every task, detach from the bus and join.
    ///
    /// Returns the first task failure, such as a controller fault.
    pub fn shutdown(self) -> Result<()> {
        info!(node = ?self.node, "node shutting down");
        self.shutdown.trigger();
        self.transport.close();
        self.tasks.join()
    }
}
