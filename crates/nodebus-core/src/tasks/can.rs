//! ---
//! nb_section: "03-can-bus"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "CAN reader and writer tasks."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use nodebus_can::{BusMetricsExporter, BusTransport, FilterSet, ReceiveError, SendError};
use nodebus_msg::{log_frame, ArbitrationId, Frame, FrameDirection, NodeId};
use nodebus_rt::ShutdownSignal;
use tracing::{debug, info, warn};

use super::{CanWriterQueue, QUEUE_POLL};
use crate::clients::TaskClient;
use crate::dispatch::Dispatcher;
use crate::messages::CanWriterTaskMessage;

/// Takes frames off the bus and dispatches what passes the filters.
pub struct CanReader<C> {
    transport: Arc<dyn BusTransport>,
    filters: FilterSet,
    dispatcher: Dispatcher<C>,
    metrics: BusMetricsExporter,
}

impl<C: TaskClient + Clone> CanReader<C> {
    /// Reader accepting only frames that pass `filters`.
    pub fn new(
        transport: Arc<dyn BusTransport>,
        filters: FilterSet,
        dispatcher: Dispatcher<C>,
        metrics: BusMetricsExporter,
    ) -> Self {
        Self {
            transport,
            filters,
            dispatcher,
            metrics,
        }
    }

    /// Receive and dispatch until `shutdown` triggers or the bus fails.
    pub fn run(self, shutdown: ShutdownSignal) -> Result<()> {
        info!(
            transport = self.transport.name(),
            filters = self.filters.len(),
            "can reader started"
        );
        while !shutdown.is_triggered() {
            match self.transport.receive() {
                Ok(frame) => self.process(&frame),
                Err(ReceiveError::Empty) => {}
                Err(ReceiveError::Closed) => {
                    info!("transport closed, can reader exiting");
                    return Ok(());
                }
                Err(err @ ReceiveError::Fault(_)) => {
                    return Err(err).context("can reader lost the bus");
                }
            }
        }
        Ok(())
    }

    /// Filter, decode and dispatch one frame.
    pub fn process(&self, frame: &Frame) {
        self.metrics.observe_received();
        if !self.filters.accepts(frame.arbitration_id()) {
            self.metrics.observe_rejected();
            log_frame(FrameDirection::Rejected, frame, None);
            return;
        }

        let header = ArbitrationId::from_raw(frame.arbitration_id());
        let target = match header.destination() {
            Ok(target) => target,
            Err(err) => {
                self.metrics.observe_rejected();
                debug!(error = %err, "frame for an unknown node");
                return;
            }
        };

        let message = match frame.decode() {
            Ok(message) => message,
            Err(err) => {
                self.metrics.observe_decode_error();
                warn!(
                    message_id = header.message_id,
                    len = frame.len(),
                    error = %err,
                    "dropping undecodable frame"
                );
                return;
            }
        };
        log_frame(FrameDirection::Inbound, frame, Some(&message));

        if let Err(err) = self.dispatcher.dispatch(target, message) {
            self.metrics.observe_dispatch_failure();
            warn!(error = %err, "dispatch failed");
        }
    }
}

/// Serializes queued messages onto the bus.
pub struct CanWriter {
    transport: Arc<dyn BusTransport>,
    queue: CanWriterQueue,
    node: NodeId,
    metrics: BusMetricsExporter,
}

impl CanWriter {
    /// `node` is the originator for messages that do not name one.
    pub fn new(
        transport: Arc<dyn BusTransport>,
        queue: CanWriterQueue,
        node: NodeId,
        metrics: BusMetricsExporter,
    ) -> Self {
        Self {
            transport,
            queue,
            node,
            metrics,
        }
    }

    /// Drain the queue onto the bus until `shutdown` triggers.
    pub fn run(self, shutdown: ShutdownSignal) -> Result<()> {
        while !shutdown.is_triggered() {
            let Some(message) = self.queue.receive(QUEUE_POLL) else {
                continue;
            };
            match self.write(message) {
                Ok(()) => {}
                Err(SendError::Closed) => {
                    info!("transport closed, can writer exiting");
                    return Ok(());
                }
                Err(err @ SendError::Fault(_)) => {
                    return Err(err).context("can writer lost the bus");
                }
                Err(err) => warn!(error = %err, "frame not sent"),
            }
        }
        Ok(())
    }

    fn write(&self, message: CanWriterTaskMessage) -> Result<(), SendError> {
        let CanWriterTaskMessage::Send {
            destination,
            origin,
            message,
        } = message;
        let frame = match Frame::from_message(&message, destination, origin.unwrap_or(self.node)) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(kind = message.name(), error = %err, "message does not fit a frame");
                return Ok(());
            }
        };
        self.transport.send(frame.arbitration_id(), frame.payload())?;
        self.metrics.observe_sent();
        log_frame(FrameDirection::Outbound, &frame, Some(&message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use nodebus_can::{BusOptions, LoopbackHub};
    use nodebus_msg::catalog::{GetSpeedRequest, GetSpeedResponse, SetSpeedRequest};
    use nodebus_msg::{Message, Mtu};
    use nodebus_rt::MessageQueue;
    use prometheus::Registry;

    use crate::clients::QueueClient;
    use crate::messages::MotorTaskMessage;
    use crate::tasks::MotorQueue;

    fn options() -> BusOptions {
        BusOptions {
            mtu: Mtu::Fd,
            receive_timeout: Duration::from_millis(5),
        }
    }

    fn reader(motor: &MotorQueue, metrics: BusMetricsExporter) -> CanReader<Arc<QueueClient>> {
        let hub = LoopbackHub::new();
        let client = Arc::new(
            QueueClient::new(Duration::from_millis(1)).with_motor(NodeId::GantryX, motor.handle()),
        );
        CanReader::new(
            Arc::new(hub.open(options(), false)),
            FilterSet::for_nodes(&[NodeId::GantryX]),
            Dispatcher::new(client, vec![NodeId::GantryX], 1),
            metrics,
        )
    }

    fn frame(message: Message, destination: NodeId) -> Frame {
        Frame::from_message(&message, destination, NodeId::Host).expect("frame")
    }

    #[test]
    fn accepted_frames_reach_the_motor_queue() {
        let metrics = BusMetricsExporter::register(&Registry::new()).expect("metrics");
        let motor = MotorQueue::new();
        let reader = reader(&motor, metrics.clone());

        reader.process(&frame(
            Message::SetSpeedRequest(SetSpeedRequest { speed: 1000 }),
            NodeId::GantryX,
        ));
        reader.process(&frame(
            Message::GetSpeedRequest(GetSpeedRequest {}),
            NodeId::GantryY,
        ));
        let truncated = Frame::new(
            frame(Message::SetSpeedRequest(SetSpeedRequest { speed: 1 }), NodeId::GantryX)
                .arbitration_id(),
            &[0x00, 0x01],
        )
        .expect("frame");
        reader.process(&truncated);

        assert!(matches!(
            motor.try_receive(),
            Some(MotorTaskMessage::SetSpeedRequest(SetSpeedRequest { speed: 1000 }))
        ));
        assert!(!motor.has_message());
        let counters = metrics.snapshot();
        assert_eq!(counters.received, 3);
        assert_eq!(counters.rejected, 1);
        assert_eq!(counters.decode_errors, 1);
        assert_eq!(counters.dispatch_failures, 0);
    }

    #[test]
    fn writer_addresses_frames_from_the_node() {
        let hub = LoopbackHub::new();
        let host = hub.open(
            BusOptions {
                mtu: Mtu::Fd,
                receive_timeout: Duration::from_secs(2),
            },
            false,
        );
        let metrics = BusMetricsExporter::register(&Registry::new()).expect("metrics");
        let queue = MessageQueue::new();
        queue.try_send(CanWriterTaskMessage::to_host(GetSpeedResponse { speed: 9 }));
        let writer = CanWriter::new(
            Arc::new(hub.open(options(), false)),
            queue,
            NodeId::GantryY,
            metrics.clone(),
        );

        let shutdown = ShutdownSignal::new();
        let stop = shutdown.clone();
        let worker = std::thread::spawn(move || writer.run(stop));

        let received = host.receive().expect("frame on the bus");
        shutdown.trigger();
        worker.join().expect("writer thread").expect("clean exit");

        let header = ArbitrationId::from_raw(received.arbitration_id());
        assert_eq!(header.origin(), Ok(NodeId::GantryY));
        assert_eq!(header.destination(), Ok(NodeId::Host));
        assert_eq!(
            received.decode().expect("decode"),
            Message::GetSpeedResponse(GetSpeedResponse { speed: 9 })
        );
        assert_eq!(metrics.snapshot().sent, 1);
    }
}
