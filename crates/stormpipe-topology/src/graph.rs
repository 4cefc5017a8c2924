use crate::spec::{RunTopology, StageId};

/// Graph structure for traversal and layer analysis.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: stage index -> downstream stage ids.
  adjacency: Vec<Vec<StageId>>,
  /// Reverse adjacency: stage index -> upstream stage ids.
  reverse_adjacency: Vec<Vec<StageId>>,
  /// Stages with no incoming edges.
  entry_points: Vec<StageId>,
}

impl Graph {
  /// Build a graph from a topology's channel edges.
  pub fn new(topology: &RunTopology) -> Self {
    let n = topology.stages.len();
    let mut adjacency: Vec<Vec<StageId>> = vec![Vec::new(); n];
    let mut reverse_adjacency: Vec<Vec<StageId>> = vec![Vec::new(); n];

    for channel in &topology.channels {
      for consumer in &channel.consumers {
        if !adjacency[channel.producer.0].contains(consumer) {
          adjacency[channel.producer.0].push(*consumer);
          reverse_adjacency[consumer.0].push(channel.producer);
        }
      }
    }

    let entry_points: Vec<StageId> = (0..n)
      .filter(|i| reverse_adjacency[*i].is_empty())
      .map(StageId)
      .collect();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
    }
  }

  /// Get entry points (stages with no incoming edges).
  pub fn entry_points(&self) -> &[StageId] {
    &self.entry_points
  }

  /// Get downstream stages for a given stage.
  pub fn downstream(&self, stage: StageId) -> &[StageId] {
    &self.adjacency[stage.0]
  }

  /// Get upstream stages for a given stage.
  pub fn upstream(&self, stage: StageId) -> &[StageId] {
    &self.reverse_adjacency[stage.0]
  }

  /// Group stages into dependency layers: layer 0 holds the entry points,
  /// and a stage sits in layer k+1 when its latest upstream dependency is
  /// in layer k. Returns `None` when the graph has a cycle.
  pub fn layers(&self) -> Option<Vec<Vec<StageId>>> {
    let n = self.adjacency.len();
    let mut indegree: Vec<usize> = self.reverse_adjacency.iter().map(Vec::len).collect();
    let mut frontier = self.entry_points.clone();
    let mut layers = Vec::new();
    let mut assigned = 0;

    while !frontier.is_empty() {
      assigned += frontier.len();
      let mut next = Vec::new();
      for stage in &frontier {
        for downstream in &self.adjacency[stage.0] {
          indegree[downstream.0] -= 1;
          if indegree[downstream.0] == 0 {
            next.push(*downstream);
          }
        }
      }
      layers.push(frontier);
      frontier = next;
    }

    if assigned == n { Some(layers) } else { None }
  }
}
