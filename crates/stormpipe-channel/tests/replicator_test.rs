//! Fan-out replication properties: byte-identity and failure isolation.

use stormpipe_channel::{ChannelReader, Replicator, bounded};
use tempfile::tempdir;

async fn collect(mut reader: ChannelReader) -> Vec<u8> {
  let mut bytes = Vec::new();
  while let Some(frame) = reader.recv().await {
    bytes.extend(frame);
  }
  bytes
}

fn frames() -> Vec<Vec<u8>> {
  vec![b"abc".to_vec(), b"defgh".to_vec(), vec![7u8; 5000]]
}

fn expected() -> Vec<u8> {
  frames().concat()
}

#[tokio::test]
async fn consumers_and_sinks_observe_identical_bytes() {
  let dir = tempdir().unwrap();
  let sink_a = dir.path().join("a.bin");
  let sink_b = dir.path().join("b.bin");

  let (writer, source) = bounded(4);
  let mut outputs = Vec::new();
  let mut readers = Vec::new();
  for _ in 0..3 {
    let (w, r) = bounded(8);
    outputs.push(w);
    readers.push(r);
  }

  let task = tokio::spawn(
    Replicator::new(source, outputs, vec![sink_a.clone(), sink_b.clone()]).run(),
  );
  for frame in frames() {
    writer.send(frame).await.unwrap();
  }
  drop(writer);
  let report = task.await.unwrap();

  assert_eq!(report.frames, 3);
  assert_eq!(report.bytes, expected().len() as u64);
  assert_eq!(report.degraded_consumers, 0);
  assert!(report.degraded_sinks.is_empty());

  for reader in readers {
    assert_eq!(collect(reader).await, expected());
  }
  assert_eq!(std::fs::read(&sink_a).unwrap(), expected());
  assert_eq!(std::fs::read(&sink_b).unwrap(), expected());
}

#[tokio::test]
async fn dead_consumer_degrades_alone() {
  let dir = tempdir().unwrap();
  let sink = dir.path().join("sink.bin");

  let (writer, source) = bounded(4);
  let (keep_writer, keep_reader) = bounded(8);
  let (dead_writer, dead_reader) = bounded(8);
  drop(dead_reader);

  let task = tokio::spawn(
    Replicator::new(source, vec![keep_writer, dead_writer], vec![sink.clone()]).run(),
  );
  for frame in frames() {
    writer.send(frame).await.unwrap();
  }
  drop(writer);
  let report = task.await.unwrap();

  assert_eq!(report.degraded_consumers, 1);
  assert!(report.degraded_sinks.is_empty());
  assert_eq!(collect(keep_reader).await, expected());
  assert_eq!(std::fs::read(&sink).unwrap(), expected());
}

#[tokio::test]
async fn unwritable_sink_degrades_without_stopping_replication() {
  let dir = tempdir().unwrap();
  let sink = dir.path().join("blocked.bin");
  std::fs::create_dir(&sink).unwrap();

  let (writer, source) = bounded(4);
  let (out_writer, out_reader) = bounded(8);
  let task = tokio::spawn(Replicator::new(source, vec![out_writer], vec![sink.clone()]).run());
  for frame in frames() {
    writer.send(frame).await.unwrap();
  }
  drop(writer);
  let report = task.await.unwrap();

  assert_eq!(report.degraded_sinks, vec![sink]);
  assert_eq!(report.degraded_consumers, 0);
  assert_eq!(collect(out_reader).await, expected());
}

#[tokio::test]
async fn sinks_receive_full_stream_without_streaming_consumers() {
  let dir = tempdir().unwrap();
  let sink = dir.path().join("only.bin");

  let (writer, source) = bounded(4);
  let task = tokio::spawn(Replicator::new(source, Vec::new(), vec![sink.clone()]).run());
  for frame in frames() {
    writer.send(frame).await.unwrap();
  }
  drop(writer);
  let report = task.await.unwrap();

  assert_eq!(report.frames, 3);
  assert_eq!(std::fs::read(&sink).unwrap(), expected());
}
