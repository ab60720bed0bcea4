//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Move-group task driving the coordinator."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::Result;
use nodebus_msg::catalog::GetMoveGroupResponse;
use nodebus_msg::{ErrorCode, ErrorSeverity, NodeId};
use nodebus_rt::ShutdownSignal;
use tracing::{info, warn};

use super::{report_error, MoveGroupQueue, QUEUE_POLL};
use crate::clients::{CanWriterClient, MotorClient};
use crate::messages::{CanWriterTaskMessage, MotorTaskMessage, MoveGroupTaskMessage};
use crate::move_group::{MoveDescriptor, MoveGroupCoordinator, MoveGroupError};

/// Builds, arms and releases move groups.
pub struct MoveGroupTask<C> {
    queue: MoveGroupQueue,
    coordinator: Arc<MoveGroupCoordinator>,
    node: NodeId,
    client: C,
}

impl<C: MotorClient + CanWriterClient> MoveGroupTask<C> {
    /// Replies and error reports are sent on behalf of `node`.
    pub fn new(
        queue: MoveGroupQueue,
        coordinator: Arc<MoveGroupCoordinator>,
        node: NodeId,
        client: C,
    ) -> Self {
        Self {
            queue,
            coordinator,
            node,
            client,
        }
    }

    /// Serve the queue until `shutdown` triggers.
    pub fn run(self, shutdown: ShutdownSignal) -> Result<()> {
        info!(groups = self.coordinator.max_groups(), "move group task started");
        while !shutdown.is_triggered() {
            if let Some(message) = self.queue.receive(QUEUE_POLL) {
                self.handle(message);
            }
        }
        Ok(())
    }

    pub(crate) fn handle(&self, message: MoveGroupTaskMessage) {
        let outcome = match message {
            MoveGroupTaskMessage::AddLinearMove { axis, request } => self
                .coordinator
                .add_move(request.group_id, axis, MoveDescriptor::from(&request)),
            MoveGroupTaskMessage::GetMoveGroupRequest(request) => self
                .coordinator
                .group_info(request.group_id)
                .map(|info| {
                    self.reply(GetMoveGroupResponse {
                        group_id: request.group_id,
                        num_moves: info.num_moves,
                        total_duration: info.total_duration,
                    })
                }),
            MoveGroupTaskMessage::ExecuteMoveGroupRequest(request) => {
                self.execute(request.group_id)
            }
            MoveGroupTaskMessage::ClearAllMoveGroupsRequest(_) => {
                self.coordinator.clear_all();
                Ok(())
            }
            MoveGroupTaskMessage::AxisCompleted { group_id, axis } => {
                if let Err(err) = self.coordinator.complete_axis(group_id, axis) {
                    warn!(group_id, ?axis, error = %err, "unexpected axis completion");
                }
                Ok(())
            }
        };
        if let Err(err) = outcome {
            self.report(&err);
        }
    }

    fn execute(&self, group_id: u8) -> Result<(), MoveGroupError> {
        self.coordinator.arm(group_id)?;
        self.coordinator
            .execute(group_id, |axis, descriptor, gate| {
                self.client.send_motor_queue(
                    axis,
                    MotorTaskMessage::ExecuteMove {
                        group_id,
                        descriptor,
                        gate,
                    },
                )
            })
            .map(|_| ())
    }

    fn reply(&self, message: impl Into<nodebus_msg::Message>) {
        if !self
            .client
            .send_can_writer_queue(CanWriterTaskMessage::reply_from(self.node, message))
        {
            warn!("move group reply dropped");
        }
    }

    fn report(&self, err: &MoveGroupError) {
        let (severity, code) = match err {
            MoveGroupError::UnknownGroup(_) => {
                (ErrorSeverity::Recoverable, ErrorCode::InvalidGroup)
            }
            MoveGroupError::InvalidState { .. } => {
                (ErrorSeverity::Warning, ErrorCode::MoveGroupRejected)
            }
            MoveGroupError::HandOffFailed { .. } => {
                (ErrorSeverity::Recoverable, ErrorCode::QueueFull)
            }
            MoveGroupError::DuplicateAxis { .. }
            | MoveGroupError::IncompleteGroup { .. }
            | MoveGroupError::UnknownAxis { .. } => {
                (ErrorSeverity::Recoverable, ErrorCode::MoveGroupRejected)
            }
        };
        warn!(error = %err, reset = err.resets_group(), "move group request failed");
        report_error(&self.client, self.node, severity, code);
    }
}
