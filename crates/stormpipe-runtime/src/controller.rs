//! Top-level run driver.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;
use stormpipe_channel::{ChannelAllocator, Workspace};
use stormpipe_topology::{RunRequest, RunTopology, StageId, Wave, compile};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::barrier::SyncBarrier;
use crate::error::RunError;
use crate::launcher::Launcher;
use crate::stage::{LivenessRecord, UnitId, UnitStatus};

/// Final status of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
  Succeeded,
  /// Carries the first failing unit's identity and exit code.
  Failed {
    unit: String,
    code: Option<i32>,
  },
}

/// Aggregate report for one run. Partial outputs that were produced
/// before a failure stay on disk; nothing is rolled back.
#[derive(Debug, Serialize)]
pub struct RunReport {
  pub run_id: String,
  pub status: RunStatus,
  pub units: Vec<LivenessRecord>,
  /// Report files produced by successful formatting stages.
  pub outputs: Vec<PathBuf>,
}

impl RunReport {
  pub fn success(&self) -> bool {
    self.status == RunStatus::Succeeded
  }

  pub fn failures(&self) -> impl Iterator<Item = &LivenessRecord> {
    self.units.iter().filter(|r| r.status.is_failure())
  }
}

/// Drives one run end to end: compile, allocate, launch, wait, report.
pub struct RunController {
  request: RunRequest,
  cancel: CancellationToken,
}

impl RunController {
  pub fn new(request: RunRequest) -> Self {
    Self {
      request,
      cancel: CancellationToken::new(),
    }
  }

  /// Token that aborts the run, killing still-running stages.
  pub fn cancellation_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  pub async fn run(self) -> Result<RunReport, RunError> {
    let run_id = Uuid::new_v4().to_string();
    info!(
      run_id = %run_id,
      partitions = self.request.partitions,
      "run_started"
    );

    let topology = compile(&self.request)?;
    let layers = topology.layers()?;
    info!(
      run_id = %run_id,
      stages = topology.stages.len(),
      channels = topology.channels.len(),
      layers = layers.len(),
      "topology_compiled"
    );

    let workspace = Workspace::new(&self.request.workspace);
    let mut allocated = ChannelAllocator::new()
      .allocate(&topology, &workspace)
      .await?;
    info!(run_id = %run_id, "channels_allocated");

    let mut barrier = SyncBarrier::new();
    let launcher = Launcher::new(&topology, &layers, self.cancel.clone());

    // Per-partition wave: every stage of every partition plus the fan-out
    // replicators, all in parallel.
    let (launched, failed) =
      launcher.launch_wave(Wave::PerPartition, &mut allocated, &HashSet::new());
    for failure in failed {
      barrier.admit(
        failure.unit,
        failure.name,
        failure.layer,
        UnitStatus::LaunchFailed,
      );
    }
    for unit in &launched {
      barrier.admit(unit.unit, unit.name.clone(), unit.layer, UnitStatus::Running);
    }
    barrier.wait_wave(launched).await;
    if self.cancel.is_cancelled() {
      return Err(RunError::Cancelled);
    }

    // Aggregation wave: formatting stages whose materialized inputs were
    // actually produced. A branch whose producer never ran is skipped;
    // independent branches still deliver their outputs.
    let skip = aggregation_skip_set(&topology, &barrier);
    for stage in &skip {
      let spec = topology.stage(*stage);
      warn!(stage = %spec.name, "stage_skipped");
      barrier.admit(
        UnitId::Stage(*stage),
        spec.name.clone(),
        layers.len().saturating_sub(1),
        UnitStatus::Skipped,
      );
    }
    let (launched, failed) = launcher.launch_wave(Wave::Aggregation, &mut allocated, &skip);
    for failure in failed {
      barrier.admit(
        failure.unit,
        failure.name,
        failure.layer,
        UnitStatus::LaunchFailed,
      );
    }
    for unit in &launched {
      barrier.admit(unit.unit, unit.name.clone(), unit.layer, UnitStatus::Running);
    }
    barrier.wait_wave(launched).await;
    if self.cancel.is_cancelled() {
      return Err(RunError::Cancelled);
    }

    // Every unit is terminal; remaining endpoints can go.
    drop(allocated);

    let status = match barrier.first_failure() {
      None => RunStatus::Succeeded,
      Some(record) => RunStatus::Failed {
        unit: record.name.clone(),
        code: record.exit_code(),
      },
    };
    let outputs = topology
      .stages_in_wave(Wave::Aggregation)
      .filter(|s| barrier.status_of(UnitId::Stage(s.id)) == Some(UnitStatus::Succeeded))
      .filter_map(|s| s.output_file.clone())
      .collect();

    let report = RunReport {
      run_id: run_id.clone(),
      status,
      units: barrier.records().to_vec(),
      outputs,
    };
    match &report.status {
      RunStatus::Succeeded => {
        info!(run_id = %run_id, outputs = report.outputs.len(), "run_completed");
      }
      RunStatus::Failed { unit, code } => {
        error!(run_id = %run_id, unit = %unit, code = ?code, "run_failed");
      }
    }

    write_report_file(&workspace, &report).await;
    Ok(report)
  }
}

/// Aggregation stages with at least one materialized input whose producer
/// did not succeed.
fn aggregation_skip_set(topology: &RunTopology, barrier: &SyncBarrier) -> HashSet<StageId> {
  let mut skip = HashSet::new();
  for spec in topology.stages_in_wave(Wave::Aggregation) {
    let broken = spec.inputs.iter().any(|channel| {
      let producer = topology.channel(*channel).producer;
      barrier.status_of(UnitId::Stage(producer)) != Some(UnitStatus::Succeeded)
    });
    if broken {
      skip.insert(spec.id);
    }
  }
  skip
}

async fn write_report_file(workspace: &Workspace, report: &RunReport) {
  let path = workspace.output_file("run_report.json");
  match serde_json::to_vec_pretty(report) {
    Ok(json) => {
      if let Err(error) = tokio::fs::write(&path, json).await {
        warn!(path = %path.display(), %error, "failed to write run report");
      }
    }
    Err(error) => {
      warn!(%error, "failed to serialize run report");
    }
  }
}
