//! Bounded streaming channel primitive.
//!
//! Every in-memory edge of a run topology is backed by one of these: a
//! bounded frame queue whose send blocks while the consumer is not
//! draining it. Backpressure propagates upstream transitively through the
//! whole pipeline; that stall-and-drain behaviour is the flow-control
//! mechanism, not an error.

use tokio::sync::mpsc;

/// Default channel capacity, in frames.
pub const DEFAULT_CAPACITY: usize = 64;

/// The read side of the channel has gone away.
#[derive(Debug, thiserror::Error)]
#[error("channel closed: the reader is gone")]
pub struct ChannelClosed;

/// Write end of a bounded channel.
#[derive(Debug)]
pub struct ChannelWriter {
  tx: mpsc::Sender<Vec<u8>>,
}

/// Read end of a bounded channel.
#[derive(Debug)]
pub struct ChannelReader {
  rx: mpsc::Receiver<Vec<u8>>,
}

/// Create a bounded channel pair.
pub fn bounded(capacity: usize) -> (ChannelWriter, ChannelReader) {
  let (tx, rx) = mpsc::channel(capacity);
  (ChannelWriter { tx }, ChannelReader { rx })
}

impl ChannelWriter {
  /// Send one frame, waiting while the channel is at capacity.
  pub async fn send(&self, frame: Vec<u8>) -> Result<(), ChannelClosed> {
    self.tx.send(frame).await.map_err(|_| ChannelClosed)
  }
}

impl ChannelReader {
  /// Receive the next frame; `None` once the writer is dropped and the
  /// queue is drained.
  pub async fn recv(&mut self) -> Option<Vec<u8>> {
    self.rx.recv().await
  }
}
