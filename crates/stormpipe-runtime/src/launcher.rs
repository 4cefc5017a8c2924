//! Process launching and channel binding.
//!
//! Every stage of a wave is started without waiting on any other stage;
//! launch order within a wave is unspecified, and correctness derives
//! solely from channel blocking semantics. Endpoints are taken out of the
//! allocated run before spawning, so a stage that fails to start drops
//! its endpoints and unblocks its neighbours immediately.

use std::collections::HashSet;
use std::process::Stdio;

use stormpipe_channel::{
  AggregatorBridge, AllocatedRun, BridgeInput, ChannelReader, ConsumerEnd, DEFAULT_CAPACITY,
  ProducerEnd, Replicator, bounded,
};
use stormpipe_topology::{RunTopology, StageId, StageSpec, Wave};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::stage::{UnitId, UnitOutcome};

const IO_CHUNK: usize = 8192;

/// A unit that has been started and must be waited on.
pub(crate) struct LaunchedUnit {
  pub unit: UnitId,
  pub name: String,
  pub layer: usize,
  pub handle: JoinHandle<UnitOutcome>,
}

/// A stage whose external program could not be started.
pub(crate) struct LaunchFailed {
  pub unit: UnitId,
  pub name: String,
  pub layer: usize,
  pub error: std::io::Error,
}

pub(crate) struct Launcher<'a> {
  topology: &'a RunTopology,
  /// Stage index -> dependency layer.
  layer_of: Vec<usize>,
  cancel: CancellationToken,
}

enum StdinFeed {
  Direct(ChannelReader),
  Bridge(Vec<BridgeInput>),
}

impl<'a> Launcher<'a> {
  pub fn new(topology: &'a RunTopology, layers: &[Vec<StageId>], cancel: CancellationToken) -> Self {
    let mut layer_of = vec![0usize; topology.stages.len()];
    for (depth, layer) in layers.iter().enumerate() {
      for stage in layer {
        layer_of[stage.0] = depth;
      }
    }
    Self {
      topology,
      layer_of,
      cancel,
    }
  }

  /// Launch every stage of a wave plus, for the per-partition wave, the
  /// fan-out replicator of every replicated channel.
  pub fn launch_wave(
    &self,
    wave: Wave,
    allocated: &mut AllocatedRun,
    skip: &HashSet<StageId>,
  ) -> (Vec<LaunchedUnit>, Vec<LaunchFailed>) {
    let mut launched = Vec::new();
    let mut failed = Vec::new();

    for spec in self.topology.stages_in_wave(wave) {
      if skip.contains(&spec.id) {
        continue;
      }
      let layer = self.layer_of[spec.id.0];
      match self.launch_stage(spec, allocated) {
        Ok(handle) => launched.push(LaunchedUnit {
          unit: UnitId::Stage(spec.id),
          name: spec.name.clone(),
          layer,
          handle,
        }),
        Err(error) => {
          error!(stage = %spec.name, %error, "stage_launch_failed");
          failed.push(LaunchFailed {
            unit: UnitId::Stage(spec.id),
            name: spec.name.clone(),
            layer,
            error,
          });
        }
      }
    }

    if wave == Wave::PerPartition {
      for parts in allocated.take_replicators() {
        let unit = UnitId::Replicator(parts.channel);
        let name = parts.name.clone();
        let layer = self.layer_of[self.topology.channel(parts.channel).producer.0];
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
          let report = Replicator::from_parts(parts).run().await;
          if report.degraded_consumers > 0 {
            warn!(
              unit = %task_name,
              degraded_consumers = report.degraded_consumers,
              "replication degraded"
            );
          }
          // A gone consumer fails the run through its own exit status; a
          // lost persistence sink has no stage to report it, so it fails
          // the replicator itself.
          if report.degraded_sinks.is_empty() {
            UnitOutcome::Succeeded
          } else {
            error!(
              unit = %task_name,
              degraded_sinks = report.degraded_sinks.len(),
              "sink materialization failed"
            );
            UnitOutcome::SinkFailed
          }
        });
        info!(unit = %name, "replicator_launched");
        launched.push(LaunchedUnit {
          unit,
          name,
          layer,
          handle,
        });
      }
    }

    (launched, failed)
  }

  fn launch_stage(
    &self,
    spec: &StageSpec,
    allocated: &mut AllocatedRun,
  ) -> Result<JoinHandle<UnitOutcome>, std::io::Error> {
    // Take endpoints before spawning: if the spawn fails they are dropped
    // here, and downstream readers observe end-of-stream instead of
    // hanging.
    let mut feeds = Vec::new();
    for channel_id in &spec.inputs {
      let partition = self
        .topology
        .stage(self.topology.channel(*channel_id).producer)
        .partition
        .unwrap_or(0);
      match allocated.take_consumer(*channel_id, spec.id) {
        Some(ConsumerEnd::Memory(reader)) => {
          feeds.push(BridgeInput::Memory { partition, reader });
        }
        Some(ConsumerEnd::File(path)) => {
          feeds.push(BridgeInput::File { partition, path });
        }
        None => {}
      }
    }
    let input = match feeds.len() {
      0 => None,
      1 if matches!(feeds[0], BridgeInput::Memory { .. }) => match feeds.pop() {
        Some(BridgeInput::Memory { reader, .. }) => Some(StdinFeed::Direct(reader)),
        _ => None,
      },
      _ => Some(StdinFeed::Bridge(feeds)),
    };

    let output = spec
      .outputs
      .first()
      .and_then(|id| allocated.take_producer(*id));

    let mut command = Command::new(&spec.program.command);
    command
      .args(&spec.program.args)
      .stdin(if input.is_some() {
        Stdio::piped()
      } else {
        Stdio::null()
      })
      .stdout(if output.is_some() {
        Stdio::piped()
      } else {
        Stdio::null()
      })
      .kill_on_drop(true);

    let child = command.spawn()?;
    info!(stage = %spec.name, command = %spec.program.command, "stage_launched");

    let name = spec.name.clone();
    let cancel = self.cancel.clone();
    Ok(tokio::spawn(drive_stage(name, child, input, output, cancel)))
  }
}

/// Result of draining a stage's stdout into its output binding.
#[derive(Debug)]
enum DrainResult {
  Completed,
  /// Every reader of the output channel is gone.
  Stalled,
}

async fn drive_stage(
  name: String,
  mut child: Child,
  input: Option<StdinFeed>,
  output: Option<ProducerEnd>,
  cancel: CancellationToken,
) -> UnitOutcome {
  let feed_handle = spawn_feed(child.stdin.take(), input);
  let mut drain_handle = spawn_drain(&name, child.stdout.take(), output);

  let mut drain_result: Option<DrainResult> = None;
  let mut stall_killed = false;

  let status = loop {
    tokio::select! {
      status = child.wait() => break status,
      result = &mut drain_handle, if drain_result.is_none() => {
        let result = result.unwrap_or(DrainResult::Completed);
        if matches!(result, DrainResult::Stalled) {
          warn!(stage = %name, "downstream readers gone; terminating stage");
          stall_killed = true;
          let _ = child.start_kill();
        }
        drain_result = Some(result);
      }
      _ = cancel.cancelled() => {
        let _ = child.start_kill();
        let _ = child.wait().await;
        if let Some(handle) = feed_handle {
          handle.abort();
        }
        return UnitOutcome::Cancelled;
      }
    }
  };

  if drain_result.is_none() {
    drain_result = Some(drain_handle.await.unwrap_or(DrainResult::Completed));
  }
  // The child is gone; a feed still blocked on its upstream would only
  // pin the reader open, which reads as a live consumer to the producer.
  if let Some(handle) = feed_handle {
    handle.abort();
  }

  match status {
    Ok(status) if status.success() => UnitOutcome::Succeeded,
    Ok(status) => {
      if stall_killed {
        UnitOutcome::Stalled
      } else {
        UnitOutcome::Exited(status.code().unwrap_or(-1))
      }
    }
    Err(error) => {
      error!(stage = %name, %error, "failed to reap stage process");
      UnitOutcome::Exited(-1)
    }
  }
}

fn spawn_feed(
  stdin: Option<tokio::process::ChildStdin>,
  input: Option<StdinFeed>,
) -> Option<JoinHandle<()>> {
  let (mut stdin, input) = match (stdin, input) {
    (Some(stdin), Some(input)) => (stdin, input),
    _ => return None,
  };
  Some(tokio::spawn(async move {
    match input {
      StdinFeed::Direct(mut reader) => {
        while let Some(frame) = reader.recv().await {
          if stdin.write_all(&frame).await.is_err() {
            return;
          }
        }
        let _ = stdin.shutdown().await;
      }
      StdinFeed::Bridge(inputs) => {
        let (writer, mut reader) = bounded(DEFAULT_CAPACITY);
        let bridge = tokio::spawn(AggregatorBridge::new(inputs, writer).run());
        while let Some(frame) = reader.recv().await {
          if stdin.write_all(&frame).await.is_err() {
            break;
          }
        }
        drop(reader);
        if let Ok(Err(error)) = bridge.await {
          warn!(%error, "fan-in bridge failed");
        }
        let _ = stdin.shutdown().await;
      }
    }
  }))
}

fn spawn_drain(
  name: &str,
  stdout: Option<tokio::process::ChildStdout>,
  output: Option<ProducerEnd>,
) -> JoinHandle<DrainResult> {
  let name = name.to_string();
  match (stdout, output) {
    (Some(mut stdout), Some(ProducerEnd::Memory(writer))) => tokio::spawn(async move {
      let mut buf = vec![0u8; IO_CHUNK];
      loop {
        match stdout.read(&mut buf).await {
          Ok(0) | Err(_) => break DrainResult::Completed,
          Ok(n) => {
            if writer.send(buf[..n].to_vec()).await.is_err() {
              break DrainResult::Stalled;
            }
          }
        }
      }
    }),
    (Some(mut stdout), Some(ProducerEnd::File(path))) => tokio::spawn(async move {
      let mut file = match tokio::fs::File::create(&path).await {
        Ok(file) => file,
        Err(error) => {
          warn!(stage = %name, path = %path.display(), %error, "materialization open failed");
          return DrainResult::Completed;
        }
      };
      let mut buf = vec![0u8; IO_CHUNK];
      loop {
        match stdout.read(&mut buf).await {
          Ok(0) | Err(_) => break,
          Ok(n) => {
            if let Err(error) = file.write_all(&buf[..n]).await {
              warn!(stage = %name, path = %path.display(), %error, "materialization write failed");
              break;
            }
          }
        }
      }
      let _ = file.flush().await;
      DrainResult::Completed
    }),
    _ => tokio::spawn(async { DrainResult::Completed }),
  }
}
