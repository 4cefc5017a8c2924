use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CompileError;
use crate::graph::Graph;
use crate::request::SinkKind;

/// Index of a stage in its topology's arena.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct StageId(pub usize);

/// Index of a channel in its topology's arena.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChannelId(pub usize);

/// Which launch wave a stage belongs to.
///
/// `Aggregation` stages consume materialized per-partition outputs and
/// start only once every `PerPartition` unit has reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wave {
  PerPartition,
  Aggregation,
}

/// A fully resolved external program invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSpec {
  pub command: String,
  pub args: Vec<String>,
}

/// One execution unit wrapping an external program.
///
/// Immutable once compiled; owned exclusively by the topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
  pub id: StageId,
  pub name: String,
  /// `None` for cross-partition aggregation stages.
  pub partition: Option<u32>,
  pub program: ProgramSpec,
  pub inputs: Vec<ChannelId>,
  pub outputs: Vec<ChannelId>,
  pub wave: Wave,
  /// Final report file, for formatting stages.
  pub output_file: Option<PathBuf>,
}

/// A persistence sink attached to a fan-out channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSpec {
  pub kind: SinkKind,
  pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
  /// One producer, one consumer.
  PointToPoint,
  /// One producer replicated verbatim to every consumer and sink.
  Fanout { sinks: Vec<SinkSpec> },
  /// One of N same-category partitioned feeds merged at the consumer.
  FanInMultiplex,
}

impl ChannelKind {
  pub fn sinks(&self) -> &[SinkSpec] {
    match self {
      ChannelKind::Fanout { sinks } => sinks,
      _ => &[],
    }
  }
}

/// A unidirectional conduit between one producer stage and a fixed
/// consumer set. The consumer set is fixed at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
  pub id: ChannelId,
  pub name: String,
  pub kind: ChannelKind,
  pub producer: StageId,
  pub consumers: Vec<StageId>,
  /// Workspace file backing this channel across the wave boundary.
  pub materialized: Option<PathBuf>,
}

/// The complete, immutable stage/channel graph for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTopology {
  pub stages: Vec<StageSpec>,
  pub channels: Vec<ChannelSpec>,
}

impl RunTopology {
  pub fn stage(&self, id: StageId) -> &StageSpec {
    &self.stages[id.0]
  }

  pub fn channel(&self, id: ChannelId) -> &ChannelSpec {
    &self.channels[id.0]
  }

  /// Build the graph structure for traversal and layer analysis.
  pub fn graph(&self) -> Graph {
    Graph::new(self)
  }

  pub fn stages_in_wave(&self, wave: Wave) -> impl Iterator<Item = &StageSpec> {
    self.stages.iter().filter(move |s| s.wave == wave)
  }

  /// Group stages into dependency layers by channel depth.
  pub fn layers(&self) -> Result<Vec<Vec<StageId>>, CompileError> {
    self.graph().layers().ok_or(CompileError::CyclicGraph)
  }

  /// Check the structural invariants: the induced stage graph is acyclic
  /// and every channel has at least one consumer or sink. The
  /// single-producer invariant holds by construction (`producer` is a
  /// single field).
  pub fn validate(&self) -> Result<(), CompileError> {
    for channel in &self.channels {
      if channel.consumers.is_empty() && channel.kind.sinks().is_empty() {
        return Err(CompileError::DanglingChannel {
          channel: channel.name.clone(),
        });
      }
    }
    self.layers()?;
    Ok(())
  }
}
