//! Channel allocation.
//!
//! Every channel endpoint and workspace entry for a run is created here,
//! before any stage starts, so stages never race to create or observe a
//! missing counterpart. Materialized entries (sink files, cross-wave
//! feeds) are pre-created empty; a run that fails mid-stream still leaves
//! well-formed entries behind.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use stormpipe_topology::{ChannelId, RunTopology, StageId};
use tracing::debug;

use crate::channel::{ChannelReader, ChannelWriter, DEFAULT_CAPACITY, bounded};
use crate::error::AllocationError;
use crate::workspace::Workspace;

/// Producer-side binding for a channel.
#[derive(Debug)]
pub enum ProducerEnd {
  Memory(ChannelWriter),
  /// Materialized channel: the producer writes the file directly.
  File(PathBuf),
}

/// Consumer-side binding for a channel.
#[derive(Debug)]
pub enum ConsumerEnd {
  Memory(ChannelReader),
  File(PathBuf),
}

/// Pre-wired parts for the fan-out task of a replicated channel.
#[derive(Debug)]
pub struct ReplicatorParts {
  pub channel: ChannelId,
  pub name: String,
  pub source: ChannelReader,
  pub outputs: Vec<ChannelWriter>,
  pub sinks: Vec<PathBuf>,
}

/// All endpoint bindings for one channel.
#[derive(Debug, Default)]
pub struct Endpoints {
  pub producer: Option<ProducerEnd>,
  pub consumers: HashMap<StageId, ConsumerEnd>,
}

/// Concrete channel primitives and workspace entries for one run.
///
/// The launcher takes endpoints out of this as it binds stages; whatever
/// remains is dropped when the run's barrier certifies completion.
#[derive(Debug, Default)]
pub struct AllocatedRun {
  endpoints: HashMap<ChannelId, Endpoints>,
  replicators: Vec<ReplicatorParts>,
}

impl AllocatedRun {
  pub fn take_producer(&mut self, channel: ChannelId) -> Option<ProducerEnd> {
    self.endpoints.get_mut(&channel)?.producer.take()
  }

  pub fn take_consumer(&mut self, channel: ChannelId, stage: StageId) -> Option<ConsumerEnd> {
    self.endpoints.get_mut(&channel)?.consumers.remove(&stage)
  }

  pub fn take_replicators(&mut self) -> Vec<ReplicatorParts> {
    std::mem::take(&mut self.replicators)
  }
}

/// Creates the backing primitives for every edge in a compiled topology.
#[derive(Debug, Clone)]
pub struct ChannelAllocator {
  capacity: usize,
}

impl Default for ChannelAllocator {
  fn default() -> Self {
    Self::new()
  }
}

impl ChannelAllocator {
  pub fn new() -> Self {
    Self {
      capacity: DEFAULT_CAPACITY,
    }
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self { capacity }
  }

  /// Create every channel primitive and workspace entry for the run.
  ///
  /// Fails without side effects on a stage: nothing has been launched yet
  /// and the whole run aborts.
  pub async fn allocate(
    &self,
    topology: &RunTopology,
    workspace: &Workspace,
  ) -> Result<AllocatedRun, AllocationError> {
    workspace.prepare().await?;

    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut run = AllocatedRun::default();

    for channel in &topology.channels {
      let mut endpoints = Endpoints::default();

      if let Some(path) = &channel.materialized {
        claim_entry(&mut seen, path).await?;
        endpoints.producer = Some(ProducerEnd::File(path.clone()));
        for consumer in &channel.consumers {
          endpoints
            .consumers
            .insert(*consumer, ConsumerEnd::File(path.clone()));
        }
      } else {
        let sinks = channel.kind.sinks();
        for sink in sinks {
          claim_entry(&mut seen, &sink.path).await?;
        }

        if sinks.is_empty() && channel.consumers.len() == 1 {
          let (writer, reader) = bounded(self.capacity);
          endpoints.producer = Some(ProducerEnd::Memory(writer));
          endpoints
            .consumers
            .insert(channel.consumers[0], ConsumerEnd::Memory(reader));
        } else {
          // Replicated: one upstream pair plus a dedicated pair per
          // consumer, copied by the fan-out task.
          let (writer, source) = bounded(self.capacity);
          endpoints.producer = Some(ProducerEnd::Memory(writer));
          let mut outputs = Vec::with_capacity(channel.consumers.len());
          for consumer in &channel.consumers {
            let (tee_writer, reader) = bounded(self.capacity);
            outputs.push(tee_writer);
            endpoints
              .consumers
              .insert(*consumer, ConsumerEnd::Memory(reader));
          }
          run.replicators.push(ReplicatorParts {
            channel: channel.id,
            name: format!("tee[{}]", channel.name),
            source,
            outputs,
            sinks: sinks.iter().map(|s| s.path.clone()).collect(),
          });
        }
      }

      run.endpoints.insert(channel.id, endpoints);
    }

    debug!(
      channels = topology.channels.len(),
      replicators = run.replicators.len(),
      "channels allocated"
    );
    Ok(run)
  }
}

/// Register a workspace entry path and pre-create it empty.
async fn claim_entry(
  seen: &mut HashSet<PathBuf>,
  path: &PathBuf,
) -> Result<(), AllocationError> {
  if !seen.insert(path.clone()) {
    return Err(AllocationError::DuplicateEntry { path: path.clone() });
  }
  tokio::fs::File::create(path)
    .await
    .map_err(|source| AllocationError::Entry {
      path: path.clone(),
      source,
    })?;
  Ok(())
}
