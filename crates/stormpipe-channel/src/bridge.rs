//! Fan-in multiplexing.

use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::channel::{ChannelReader, ChannelWriter};
use crate::error::BridgeError;

const READ_CHUNK: usize = 8192;

/// One partitioned feed into a bridge.
#[derive(Debug)]
pub enum BridgeInput {
  Memory { partition: u32, reader: ChannelReader },
  File { partition: u32, path: PathBuf },
}

impl BridgeInput {
  fn partition(&self) -> u32 {
    match self {
      BridgeInput::Memory { partition, .. } => *partition,
      BridgeInput::File { partition, .. } => *partition,
    }
  }
}

/// Merges N same-category partitioned feeds into one combined stream.
///
/// Partitions are forwarded whole, in ascending partition order; records
/// within a partition keep their original relative order. No ordering is
/// imposed across partitions beyond that.
pub struct AggregatorBridge {
  inputs: Vec<BridgeInput>,
  output: ChannelWriter,
}

impl AggregatorBridge {
  pub fn new(mut inputs: Vec<BridgeInput>, output: ChannelWriter) -> Self {
    inputs.sort_by_key(BridgeInput::partition);
    Self { inputs, output }
  }

  /// Forward every input to the output, in partition order.
  pub async fn run(self) -> Result<(), BridgeError> {
    let output = self.output;
    for input in self.inputs {
      match input {
        BridgeInput::Memory { mut reader, .. } => {
          while let Some(frame) = reader.recv().await {
            output
              .send(frame)
              .await
              .map_err(|_| BridgeError::OutputClosed)?;
          }
        }
        BridgeInput::File { path, .. } => {
          let mut file =
            File::open(&path)
              .await
              .map_err(|source| BridgeError::Source {
                path: path.clone(),
                source,
              })?;
          let mut buf = vec![0u8; READ_CHUNK];
          loop {
            let n = file
              .read(&mut buf)
              .await
              .map_err(|source| BridgeError::Source {
                path: path.clone(),
                source,
              })?;
            if n == 0 {
              break;
            }
            output
              .send(buf[..n].to_vec())
              .await
              .map_err(|_| BridgeError::OutputClosed)?;
          }
        }
      }
    }
    Ok(())
  }
}
