//! Launched units and their liveness.

use serde::Serialize;
use stormpipe_topology::{ChannelId, StageId};

/// Identity of one launched unit of a run.
///
/// External stages come from the topology; replicators are
/// orchestrator-internal fan-out tasks that join the same termination
/// barrier as the stages around them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitId {
  Stage(StageId),
  Replicator(ChannelId),
}

/// Completion state of a unit. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
  Running,
  Succeeded,
  /// Ran and exited non-zero.
  Failed(i32),
  /// The external program could not be started at all.
  LaunchFailed,
  /// Blocked on a channel whose readers were gone; terminated by the
  /// orchestrator.
  Stalled,
  /// A requested persistence sink could not be written; streaming
  /// consumers were unaffected.
  SinkFailed,
  Cancelled,
  /// Never launched because its upstream branch failed.
  Skipped,
}

impl UnitStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, UnitStatus::Running)
  }

  pub fn is_failure(&self) -> bool {
    matches!(
      self,
      UnitStatus::Failed(_)
        | UnitStatus::LaunchFailed
        | UnitStatus::Stalled
        | UnitStatus::SinkFailed
        | UnitStatus::Cancelled
    )
  }
}

/// Liveness record for one unit: created at spawn time, finalized at
/// exit, discarded with the run report.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessRecord {
  pub unit: UnitId,
  pub name: String,
  /// Dependency layer by channel depth; replicators carry their
  /// producer's layer.
  pub layer: usize,
  pub status: UnitStatus,
}

impl LivenessRecord {
  pub fn exit_code(&self) -> Option<i32> {
    match self.status {
      UnitStatus::Failed(code) => Some(code),
      _ => None,
    }
  }
}

/// Terminal outcome returned by a unit's driver task.
#[derive(Debug)]
pub(crate) enum UnitOutcome {
  Succeeded,
  Exited(i32),
  Stalled,
  SinkFailed,
  Cancelled,
}

impl UnitOutcome {
  pub(crate) fn into_status(self) -> UnitStatus {
    match self {
      UnitOutcome::Succeeded => UnitStatus::Succeeded,
      UnitOutcome::Exited(code) => UnitStatus::Failed(code),
      UnitOutcome::Stalled => UnitStatus::Stalled,
      UnitOutcome::SinkFailed => UnitStatus::SinkFailed,
      UnitOutcome::Cancelled => UnitStatus::Cancelled,
    }
  }
}
