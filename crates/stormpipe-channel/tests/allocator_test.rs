//! Allocation tests against a compiled topology in a temp workspace.

use std::path::PathBuf;

use stormpipe_channel::{AllocationError, ChannelAllocator, Workspace};
use stormpipe_topology::{
  AnalyticsKind, Perspective, PerspectiveRequest, ProgramSet, RunRequest, RunTopology, SinkKind,
  SummaryLevel, SummaryRequest, compile,
};
use tempfile::tempdir;

fn request(workspace: PathBuf, partitions: u32) -> RunRequest {
  RunRequest {
    partitions,
    perspectives: vec![PerspectiveRequest {
      perspective: Perspective::GroundUp,
      summaries: vec![SummaryRequest {
        level: SummaryLevel::new("portfolio"),
        analytics: vec![AnalyticsKind::EventLossTable],
        sinks: vec![SinkKind::LossExceedance],
      }],
    }],
    workspace,
    programs: ProgramSet::default(),
  }
}

fn compiled(workspace: PathBuf, partitions: u32) -> RunTopology {
  compile(&request(workspace, partitions)).unwrap()
}

#[tokio::test]
async fn allocation_precreates_every_workspace_entry() {
  let dir = tempdir().unwrap();
  let workspace = Workspace::new(dir.path());
  let topology = compiled(dir.path().to_path_buf(), 2);

  ChannelAllocator::new()
    .allocate(&topology, &workspace)
    .await
    .unwrap();

  // One persistence sink and one materialized reducer feed per partition.
  for name in [
    "gul_portfolio_lec_p0.bin",
    "gul_portfolio_lec_p1.bin",
    "gul_portfolio_elt_p0.bin",
    "gul_portfolio_elt_p1.bin",
  ] {
    let path = workspace.work_file(name);
    let meta = std::fs::metadata(&path).unwrap();
    assert!(meta.is_file());
    assert_eq!(meta.len(), 0, "{name} should be created empty");
  }
  assert!(workspace.output_dir().is_dir());
}

#[tokio::test]
async fn allocation_wires_a_replicator_per_fanout() {
  let dir = tempdir().unwrap();
  let workspace = Workspace::new(dir.path());
  let topology = compiled(dir.path().to_path_buf(), 2);

  let mut allocated = ChannelAllocator::new()
    .allocate(&topology, &workspace)
    .await
    .unwrap();

  // One summary fan-out per partition carries the sink.
  let replicators = allocated.take_replicators();
  assert_eq!(replicators.len(), 2);
  for parts in &replicators {
    assert!(parts.name.starts_with("tee[summary["));
    assert_eq!(parts.outputs.len(), 1);
    assert_eq!(parts.sinks.len(), 1);
  }
  assert!(allocated.take_replicators().is_empty());
}

#[tokio::test]
async fn endpoints_are_takeable_exactly_once() {
  let dir = tempdir().unwrap();
  let workspace = Workspace::new(dir.path());
  let topology = compiled(dir.path().to_path_buf(), 1);

  let mut allocated = ChannelAllocator::new()
    .allocate(&topology, &workspace)
    .await
    .unwrap();

  for channel in &topology.channels {
    assert!(allocated.take_producer(channel.id).is_some());
    assert!(allocated.take_producer(channel.id).is_none());
    for consumer in &channel.consumers {
      assert!(allocated.take_consumer(channel.id, *consumer).is_some());
      assert!(allocated.take_consumer(channel.id, *consumer).is_none());
    }
  }
}

#[tokio::test]
async fn reallocation_clears_residue_from_a_previous_run() {
  let dir = tempdir().unwrap();
  let workspace = Workspace::new(dir.path());
  let topology = compiled(dir.path().to_path_buf(), 1);
  let allocator = ChannelAllocator::new();

  allocator.allocate(&topology, &workspace).await.unwrap();
  std::fs::write(workspace.work_file("stale.bin"), b"junk").unwrap();
  std::fs::write(workspace.output_file("stale.csv"), b"junk").unwrap();

  allocator.allocate(&topology, &workspace).await.unwrap();
  assert!(!workspace.work_file("stale.bin").exists());
  assert!(!workspace.output_file("stale.csv").exists());
}

#[tokio::test]
async fn non_directory_work_path_is_a_collision() {
  let dir = tempdir().unwrap();
  let workspace = Workspace::new(dir.path());
  std::fs::write(dir.path().join("work"), b"not a directory").unwrap();
  let topology = compiled(dir.path().to_path_buf(), 1);

  let err = ChannelAllocator::new()
    .allocate(&topology, &workspace)
    .await
    .unwrap_err();
  assert!(matches!(err, AllocationError::PathCollision { .. }));
}
