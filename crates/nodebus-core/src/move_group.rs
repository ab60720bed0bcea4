//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Move-group coordination and release gating."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Move groups collect one move per axis and release them as a unit.
//!
//! ```text
//! Empty --add_move--> Accumulating --arm--> Armed --execute--> Executing
//!   ^                                                              |
//!   +------------------- complete_axis (last axis) ----------------+
//! ```
//!
//! Each group sits behind its own lock, so traffic for one group never waits
//! on another. `execute` hands every axis its move together with a shared
//! [`ReleaseGate`]; consumers block on the gate and the gate opens only after
//! the last hand-off succeeded, so no axis starts before all of them hold
//! their move.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use nodebus_msg::catalog::AddLinearMoveRequest;
use nodebus_msg::NodeId;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Axes are addressed by their bus node id.
pub type AxisId = NodeId;

/// One axis' share of a move group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveDescriptor {
    /// Position of the move within its group.
    pub seq_id: u8,
    /// Move length in ticks.
    pub duration: u32,
    /// Signed steps per tick.
    pub velocity: i32,
    /// Signed change of velocity per tick.
    pub acceleration: i32,
}

impl From<&AddLinearMoveRequest> for MoveDescriptor {
    fn from(request: &AddLinearMoveRequest) -> Self {
        Self {
            seq_id: request.seq_id,
            duration: request.duration,
            velocity: request.velocity,
            acceleration: request.acceleration,
        }
    }
}

/// Lifecycle of a single group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    /// No moves stored.
    Empty,
    /// Moves arriving; not every axis has one yet.
    Accumulating,
    /// Every expected axis holds a move.
    Armed,
    /// Released to the motor tasks; waiting for completions.
    Executing,
}

/// Coordination failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveGroupError {
    /// `axis` already added a move to `group`.
    #[error("group {group} already holds a move for {axis:?}")]
    DuplicateAxis {
        /// Group index.
        group: u8,
        /// Axis that sent the second move.
        axis: AxisId,
    },
    /// Arming before every expected axis has a move.
    #[error("group {group} is missing moves for {missing:?}")]
    IncompleteGroup {
        /// Group index.
        group: u8,
        /// Expected axes without a move.
        missing: Vec<AxisId>,
    },
    /// Group index out of range.
    #[error("group {0} does not exist")]
    UnknownGroup(u8),
    /// The axis is not expected to take part in the group.
    #[error("{axis:?} is not part of group {group}")]
    UnknownAxis {
        /// Group index.
        group: u8,
        /// Axis outside the group's expected set.
        axis: AxisId,
    },
    /// The operation is not allowed in the group's current state.
    #[error("cannot {operation} group {group} while {state:?}")]
    InvalidState {
        /// Group index.
        group: u8,
        /// State the group was in.
        state: GroupState,
        /// What was attempted, e.g. `arm`.
        operation: &'static str,
    },
    /// A motor task refused its released move.
    #[error("hand-off of group {group} to {axis:?} failed")]
    HandOffFailed {
        /// Group index.
        group: u8,
        /// Axis whose queue refused the move.
        axis: AxisId,
    },
}

impl MoveGroupError {
    /// Whether the failure reset the group to [`GroupState::Empty`].
    pub fn resets_group(&self) -> bool {
        matches!(
            self,
            MoveGroupError::DuplicateAxis { .. }
                | MoveGroupError::IncompleteGroup { .. }
                | MoveGroupError::HandOffFailed { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Pending,
    Released,
    Cancelled,
}

/// Outcome of waiting on a [`ReleaseGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Every axis holds its move; start now.
    Released,
    /// The group was abandoned; discard the move.
    Cancelled,
    /// Still pending after the timeout.
    TimedOut,
}

/// One-shot barrier shared by every axis of an executing group.
#[derive(Debug, Clone)]
pub struct ReleaseGate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

impl ReleaseGate {
    fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(GateState::Pending), Condvar::new())),
        }
    }

    fn settle(&self, outcome: GateState) {
        let (state, cvar) = &*self.inner;
        let mut state = state.lock();
        if *state == GateState::Pending {
            *state = outcome;
            cvar.notify_all();
        }
    }

    fn release(&self) {
        self.settle(GateState::Released);
    }

    fn cancel(&self) {
        self.settle(GateState::Cancelled);
    }

    /// Block until the gate settles or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> GateOutcome {
        let (state, cvar) = &*self.inner;
        let mut state = state.lock();
        if *state == GateState::Pending {
            cvar.wait_for(&mut state, timeout);
        }
        match *state {
            GateState::Pending => GateOutcome::TimedOut,
            GateState::Released => GateOutcome::Released,
            GateState::Cancelled => GateOutcome::Cancelled,
        }
    }

    /// Whether the gate has opened.
    pub fn is_released(&self) -> bool {
        *self.inner.0.lock() == GateState::Released
    }
}

/// Summary reported for `GetMoveGroupRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupInfo {
    /// Moves stored in the group.
    pub num_moves: u8,
    /// Longest axis duration; axes run in parallel.
    pub total_duration: u32,
}

#[derive(Debug)]
struct MoveGroup {
    state: GroupState,
    moves: BTreeMap<AxisId, MoveDescriptor>,
    pending: BTreeSet<AxisId>,
    gate: Option<ReleaseGate>,
}

impl MoveGroup {
    fn new() -> Self {
        Self {
            state: GroupState::Empty,
            moves: BTreeMap::new(),
            pending: BTreeSet::new(),
            gate: None,
        }
    }

    fn reset(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.cancel();
        }
        self.state = GroupState::Empty;
        self.moves.clear();
        self.pending.clear();
    }
}

/// Owner of every move group on a node.
#[derive(Debug)]
pub struct MoveGroupCoordinator {
    groups: Vec<Mutex<MoveGroup>>,
    axes: Vec<AxisId>,
    expected: Vec<AxisId>,
}

impl MoveGroupCoordinator {
    /// `axes` may hold moves; every axis in `expected` must hold one before arming.
    pub fn new(max_groups: u8, axes: Vec<AxisId>, expected: Vec<AxisId>) -> Self {
        Self {
            groups: (0..max_groups).map(|_| Mutex::new(MoveGroup::new())).collect(),
            axes,
            expected,
        }
    }

    /// Number of groups.
    pub fn max_groups(&self) -> u8 {
        self.groups.len() as u8
    }

    fn group(&self, group: u8) -> Result<&Mutex<MoveGroup>, MoveGroupError> {
        self.groups
            .get(usize::from(group))
            .ok_or(MoveGroupError::UnknownGroup(group))
    }

    /// Current state of `group`.
    pub fn state(&self, group: u8) -> Result<GroupState, MoveGroupError> {
        Ok(self.group(group)?.lock().state)
    }

    /// Record `axis`'s move in `group`.
    pub fn add_move(
        &self,
        group: u8,
        axis: AxisId,
        descriptor: MoveDescriptor,
    ) -> Result<(), MoveGroupError> {
        let mut entry = self.group(group)?.lock();
        if !self.axes.contains(&axis) {
            return Err(MoveGroupError::UnknownAxis { group, axis });
        }
        match entry.state {
            GroupState::Empty | GroupState::Accumulating => {}
            state => {
                return Err(MoveGroupError::InvalidState {
                    group,
                    state,
                    operation: "add a move to",
                })
            }
        }
        if entry.moves.contains_key(&axis) {
            entry.reset();
            warn!(group, ?axis, "duplicate axis, group reset");
            return Err(MoveGroupError::DuplicateAxis { group, axis });
        }
        entry.moves.insert(axis, descriptor);
        entry.state = GroupState::Accumulating;
        debug!(group, ?axis, moves = entry.moves.len(), "move added");
        Ok(())
    }

    /// Lock the group once every expected axis holds a move.
    pub fn arm(&self, group: u8) -> Result<(), MoveGroupError> {
        let mut entry = self.group(group)?.lock();
        if entry.state != GroupState::Accumulating {
            return Err(MoveGroupError::InvalidState {
                group,
                state: entry.state,
                operation: "arm",
            });
        }
        let missing: Vec<AxisId> = self
            .expected
            .iter()
            .copied()
            .filter(|axis| !entry.moves.contains_key(axis))
            .collect();
        if !missing.is_empty() {
            entry.reset();
            warn!(group, ?missing, "incomplete group, group reset");
            return Err(MoveGroupError::IncompleteGroup { group, missing });
        }
        entry.state = GroupState::Armed;
        debug!(group, "group armed");
        Ok(())
    }

    /// Hand every move of an armed group to `hand_off`, then open the gate.
    ///
    /// `hand_off` returns `false` when the axis could not take the move; the
    /// gate is then cancelled and the group reset. Returns the number of
    /// axes released.
    pub fn execute<F>(&self, group: u8, mut hand_off: F) -> Result<usize, MoveGroupError>
    where
        F: FnMut(AxisId, MoveDescriptor, ReleaseGate) -> bool,
    {
        let mut entry = self.group(group)?.lock();
        if entry.state != GroupState::Armed {
            return Err(MoveGroupError::InvalidState {
                group,
                state: entry.state,
                operation: "execute",
            });
        }
        let gate = ReleaseGate::new();
        entry.state = GroupState::Executing;
        entry.gate = Some(gate.clone());
        entry.pending = entry.moves.keys().copied().collect();

        let moves: Vec<(AxisId, MoveDescriptor)> =
            entry.moves.iter().map(|(axis, mv)| (*axis, *mv)).collect();
        for (axis, descriptor) in moves {
            if !hand_off(axis, descriptor, gate.clone()) {
                entry.reset();
                warn!(group, ?axis, "hand-off failed, group cancelled");
                return Err(MoveGroupError::HandOffFailed { group, axis });
            }
        }
        gate.release();
        info!(group, axes = entry.pending.len(), "group released");
        Ok(entry.pending.len())
    }

    /// Mark `axis` done. Returns `true` when that finished the group.
    pub fn complete_axis(&self, group: u8, axis: AxisId) -> Result<bool, MoveGroupError> {
        let mut entry = self.group(group)?.lock();
        if entry.state != GroupState::Executing {
            return Err(MoveGroupError::InvalidState {
                group,
                state: entry.state,
                operation: "complete an axis of",
            });
        }
        if !entry.pending.remove(&axis) {
            return Err(MoveGroupError::UnknownAxis { group, axis });
        }
        if entry.pending.is_empty() {
            entry.reset();
            info!(group, "group completed");
            return Ok(true);
        }
        Ok(false)
    }

    /// Summary of the moves in `group`.
    pub fn group_info(&self, group: u8) -> Result<GroupInfo, MoveGroupError> {
        let entry = self.group(group)?.lock();
        Ok(GroupInfo {
            num_moves: entry.moves.len() as u8,
            total_duration: entry.moves.values().map(|mv| mv.duration).max().unwrap_or(0),
        })
    }

    /// Drop every group, cancelling gates that have not opened yet.
    pub fn clear_all(&self) {
        for group in &self.groups {
            group.lock().reset();
        }
        info!(groups = self.groups.len(), "all move groups cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    const X: AxisId = NodeId::GantryX;
    const Y: AxisId = NodeId::GantryY;

    fn descriptor(duration: u32) -> MoveDescriptor {
        MoveDescriptor {
            seq_id: 0,
            duration,
            velocity: 10,
            acceleration: 0,
        }
    }

    fn coordinator() -> MoveGroupCoordinator {
        MoveGroupCoordinator::new(4, vec![X, Y], vec![X, Y])
    }

    #[test]
    fn full_lifecycle_returns_to_empty() {
        let coord = coordinator();
        coord.add_move(1, X, descriptor(100)).unwrap();
        coord.add_move(1, Y, descriptor(250)).unwrap();
        assert_eq!(coord.state(1).unwrap(), GroupState::Accumulating);
        assert_eq!(
            coord.group_info(1).unwrap(),
            GroupInfo {
                num_moves: 2,
                total_duration: 250
            }
        );

        coord.arm(1).unwrap();
        let mut handed = Vec::new();
        let released = coord
            .execute(1, |axis, mv, gate| {
                assert!(!gate.is_released(), "gate opens only after every hand-off");
                handed.push((axis, mv.duration));
                true
            })
            .unwrap();
        assert_eq!(released, 2);
        assert_eq!(handed, vec![(X, 100), (Y, 250)]);
        assert_eq!(coord.state(1).unwrap(), GroupState::Executing);

        assert!(!coord.complete_axis(1, X).unwrap());
        assert!(coord.complete_axis(1, Y).unwrap());
        assert_eq!(coord.state(1).unwrap(), GroupState::Empty);
    }

    #[test]
    fn arm_requires_every_expected_axis() {
        let coord = coordinator();
        coord.add_move(0, X, descriptor(1)).unwrap();
        assert_eq!(
            coord.arm(0).unwrap_err(),
            MoveGroupError::IncompleteGroup {
                group: 0,
                missing: vec![Y]
            }
        );
        assert_eq!(coord.state(0).unwrap(), GroupState::Empty);
    }

    #[test]
    fn duplicate_axis_resets_only_that_group() {
        let coord = coordinator();
        coord.add_move(0, X, descriptor(1)).unwrap();
        coord.add_move(2, X, descriptor(1)).unwrap();
        assert_eq!(
            coord.add_move(0, X, descriptor(2)).unwrap_err(),
            MoveGroupError::DuplicateAxis { group: 0, axis: X }
        );
        assert_eq!(coord.state(0).unwrap(), GroupState::Empty);
        assert_eq!(coord.state(2).unwrap(), GroupState::Accumulating);
    }

    #[test]
    fn invalid_transitions_leave_state_alone() {
        let coord = coordinator();
        coord.add_move(0, X, descriptor(1)).unwrap();
        coord.add_move(0, Y, descriptor(1)).unwrap();
        coord.arm(0).unwrap();
        let err = coord.add_move(0, X, descriptor(1)).unwrap_err();
        assert!(matches!(err, MoveGroupError::InvalidState { .. }));
        assert!(!err.resets_group());
        assert_eq!(coord.state(0).unwrap(), GroupState::Armed);
        assert!(matches!(
            coord.complete_axis(0, X),
            Err(MoveGroupError::InvalidState { .. })
        ));
    }

    #[test]
    fn unknown_groups_and_axes_are_rejected() {
        let coord = coordinator();
        assert_eq!(coord.state(4).unwrap_err(), MoveGroupError::UnknownGroup(4));
        assert_eq!(
            coord.add_move(0, NodeId::Gripper, descriptor(1)).unwrap_err(),
            MoveGroupError::UnknownAxis {
                group: 0,
                axis: NodeId::Gripper
            }
        );
    }

    #[test]
    fn failed_hand_off_cancels_the_gate() {
        let coord = coordinator();
        coord.add_move(3, X, descriptor(1)).unwrap();
        coord.add_move(3, Y, descriptor(1)).unwrap();
        coord.arm(3).unwrap();

        let mut gates = Vec::new();
        let err = coord
            .execute(3, |axis, _, gate| {
                gates.push(gate);
                axis == X
            })
            .unwrap_err();
        assert_eq!(err, MoveGroupError::HandOffFailed { group: 3, axis: Y });
        assert_eq!(gates[0].wait(Duration::from_millis(1)), GateOutcome::Cancelled);
        assert_eq!(coord.state(3).unwrap(), GroupState::Empty);
    }

    #[test]
    fn all_consumers_observe_release_together() {
        let coord = Arc::new(coordinator());
        coord.add_move(0, X, descriptor(1)).unwrap();
        coord.add_move(0, Y, descriptor(1)).unwrap();
        coord.arm(0).unwrap();

        let ready = Arc::new(Barrier::new(3));
        let (tx, rx) = std::sync::mpsc::channel();
        let mut consumers = Vec::new();
        let execute_result = coord.execute(0, |axis, _, gate| {
            let ready = Arc::clone(&ready);
            let tx = tx.clone();
            consumers.push(thread::spawn(move || {
                ready.wait();
                let outcome = gate.wait(Duration::from_secs(5));
                tx.send((axis, outcome)).expect("report");
            }));
            true
        });
        assert_eq!(execute_result.unwrap(), 2);
        ready.wait();
        for consumer in consumers {
            consumer.join().expect("consumer");
        }
        let outcomes: Vec<_> = rx.try_iter().collect();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|(_, outcome)| *outcome == GateOutcome::Released));
    }

    #[test]
    fn clear_all_cancels_pending_groups() {
        let coord = coordinator();
        coord.add_move(0, X, descriptor(1)).unwrap();
        coord.add_move(1, X, descriptor(1)).unwrap();
        coord.clear_all();
        assert_eq!(coord.state(0).unwrap(), GroupState::Empty);
        assert_eq!(coord.state(1).unwrap(), GroupState::Empty);
        assert_eq!(coord.group_info(0).unwrap().num_moves, 0);
    }
}
