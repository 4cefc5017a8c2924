//! Fan-in ordering tests.

use stormpipe_channel::{AggregatorBridge, BridgeError, BridgeInput, ChannelReader, bounded};
use tempfile::tempdir;

async fn collect(mut reader: ChannelReader) -> Vec<u8> {
  let mut bytes = Vec::new();
  while let Some(frame) = reader.recv().await {
    bytes.extend(frame);
  }
  bytes
}

#[tokio::test]
async fn memory_inputs_merge_in_partition_order() {
  let mut inputs = Vec::new();
  // Registered out of order on purpose.
  for partition in [2u32, 0, 1] {
    let (writer, reader) = bounded(4);
    inputs.push(BridgeInput::Memory { partition, reader });
    tokio::spawn(async move {
      writer
        .send(format!("p{partition}-a;").into_bytes())
        .await
        .unwrap();
      writer
        .send(format!("p{partition}-b;").into_bytes())
        .await
        .unwrap();
    });
  }

  let (output, combined) = bounded(16);
  let bridge = AggregatorBridge::new(inputs, output);
  tokio::spawn(bridge.run());

  assert_eq!(
    collect(combined).await,
    b"p0-a;p0-b;p1-a;p1-b;p2-a;p2-b;".to_vec()
  );
}

#[tokio::test]
async fn file_inputs_are_concatenated_whole() {
  let dir = tempdir().unwrap();
  let mut inputs = Vec::new();
  for partition in [1u32, 0] {
    let path = dir.path().join(format!("feed_p{partition}.bin"));
    std::fs::write(&path, format!("part{partition};")).unwrap();
    inputs.push(BridgeInput::File { partition, path });
  }

  let (output, combined) = bounded(16);
  AggregatorBridge::new(inputs, output).run().await.unwrap();

  assert_eq!(collect(combined).await, b"part0;part1;".to_vec());
}

#[tokio::test]
async fn closed_output_fails_the_bridge() {
  let (writer, reader) = bounded(4);
  writer.send(b"data".to_vec()).await.unwrap();
  drop(writer);

  let (output, combined) = bounded(4);
  drop(combined);

  let err = AggregatorBridge::new(
    vec![BridgeInput::Memory {
      partition: 0,
      reader,
    }],
    output,
  )
  .run()
  .await
  .unwrap_err();
  assert!(matches!(err, BridgeError::OutputClosed));
}
