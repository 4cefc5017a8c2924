//! The synchronization barrier.
//!
//! Tracks the liveness of every launched unit and drives a wave of units
//! to terminal state. Channel endpoints live inside the unit tasks, so a
//! channel's resources are only released once both its producer and every
//! consumer holding a read endpoint have terminated; `wait_wave`
//! returning is the certification that the wave's resources may be
//! released and the next wave may start.

use std::collections::HashMap;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info};

use crate::launcher::LaunchedUnit;
use crate::stage::{LivenessRecord, UnitId, UnitStatus};

#[derive(Debug, Default)]
pub struct SyncBarrier {
  records: Vec<LivenessRecord>,
  index: HashMap<UnitId, usize>,
  first_failure: Option<usize>,
}

impl SyncBarrier {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a unit. Units admitted in a terminal state (launch
  /// failures, skipped branches) are finalized immediately.
  pub(crate) fn admit(&mut self, unit: UnitId, name: String, layer: usize, status: UnitStatus) {
    let idx = self.records.len();
    self.records.push(LivenessRecord {
      unit,
      name,
      layer,
      status,
    });
    self.index.insert(unit, idx);
    if status.is_failure() && self.first_failure.is_none() {
      self.first_failure = Some(idx);
    }
  }

  fn finalize(&mut self, unit: UnitId, status: UnitStatus) {
    let Some(&idx) = self.index.get(&unit) else {
      return;
    };
    let record = &mut self.records[idx];
    if record.status.is_terminal() {
      return;
    }
    record.status = status;
    if status.is_failure() && self.first_failure.is_none() {
      self.first_failure = Some(idx);
    }
  }

  /// Wait for every unit of the wave to reach a terminal state.
  ///
  /// A failed unit does not stop its siblings: already-launched stages in
  /// independent branches run to completion, and a producer whose readers
  /// died resolves through the stall path rather than blocking forever.
  pub(crate) async fn wait_wave(&mut self, launched: Vec<LaunchedUnit>) {
    let mut pending: FuturesUnordered<_> = launched
      .into_iter()
      .map(|unit| async move {
        let outcome = unit.handle.await;
        (unit.unit, unit.name, unit.layer, outcome)
      })
      .collect();

    while let Some((unit, name, layer, joined)) = pending.next().await {
      let status = match joined {
        Ok(outcome) => outcome.into_status(),
        Err(join_error) => {
          error!(unit = %name, %join_error, "unit task failed to join");
          UnitStatus::Failed(-1)
        }
      };
      match status {
        UnitStatus::Succeeded => {
          info!(unit = %name, layer, "stage_completed");
        }
        UnitStatus::Failed(code) => {
          error!(unit = %name, layer, code, "stage_failed");
        }
        other => {
          error!(unit = %name, layer, status = ?other, "stage_failed");
        }
      }
      self.finalize(unit, status);
    }
  }

  pub fn records(&self) -> &[LivenessRecord] {
    &self.records
  }

  pub fn status_of(&self, unit: UnitId) -> Option<UnitStatus> {
    self.index.get(&unit).map(|&idx| self.records[idx].status)
  }

  /// The first failure observed, in completion order.
  pub fn first_failure(&self) -> Option<&LivenessRecord> {
    self.first_failure.map(|idx| &self.records[idx])
  }

  pub fn all_terminal(&self) -> bool {
    self.records.iter().all(|r| r.status.is_terminal())
  }
}
