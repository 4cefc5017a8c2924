//! Fan-out replication.

use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::allocator::ReplicatorParts;
use crate::channel::{ChannelReader, ChannelWriter};

/// Copies one upstream stream verbatim to every consumer and sink.
///
/// The copy is synchronous: a slow consumer backpressures this loop and,
/// through the bounded source channel, the upstream producer. There is no
/// buffering beyond the frame in flight. A consumer that goes away or a
/// sink whose I/O fails is degraded on its own; siblings keep receiving
/// the complete stream, and sinks receive the full stream even when every
/// streaming consumer is gone. Sink files are opened at the first frame;
/// an empty stream leaves the allocator's pre-created empty entry as is.
pub struct Replicator {
  source: ChannelReader,
  outputs: Vec<Option<ChannelWriter>>,
  sink_paths: Vec<PathBuf>,
}

enum SinkSlot {
  Pending(PathBuf),
  Open { path: PathBuf, file: File },
  Degraded,
}

/// What happened across one replication.
#[derive(Debug, Default)]
pub struct ReplicationReport {
  pub frames: u64,
  pub bytes: u64,
  pub degraded_consumers: usize,
  pub degraded_sinks: Vec<PathBuf>,
}

impl Replicator {
  pub fn new(source: ChannelReader, outputs: Vec<ChannelWriter>, sinks: Vec<PathBuf>) -> Self {
    Self {
      source,
      outputs: outputs.into_iter().map(Some).collect(),
      sink_paths: sinks,
    }
  }

  pub fn from_parts(parts: ReplicatorParts) -> Self {
    Self::new(parts.source, parts.outputs, parts.sinks)
  }

  /// Run the replication to completion of the source stream.
  pub async fn run(mut self) -> ReplicationReport {
    let mut report = ReplicationReport::default();
    let mut sinks: Vec<SinkSlot> = self.sink_paths.drain(..).map(SinkSlot::Pending).collect();

    while let Some(frame) = self.source.recv().await {
      report.frames += 1;
      report.bytes += frame.len() as u64;

      for output in self.outputs.iter_mut() {
        if let Some(writer) = output {
          if writer.send(frame.clone()).await.is_err() {
            warn!("fan-out consumer gone; degrading consumer");
            report.degraded_consumers += 1;
            *output = None;
          }
        }
      }

      for slot in sinks.iter_mut() {
        if let SinkSlot::Pending(pending) = slot {
          let path = std::mem::take(pending);
          match File::create(&path).await {
            Ok(file) => *slot = SinkSlot::Open { path, file },
            Err(error) => {
              warn!(path = %path.display(), %error, "sink open failed; degrading sink");
              report.degraded_sinks.push(path);
              *slot = SinkSlot::Degraded;
            }
          }
        }
        if let SinkSlot::Open { path, file } = slot {
          if let Err(error) = file.write_all(&frame).await {
            warn!(path = %path.display(), %error, "sink write failed; degrading sink");
            report.degraded_sinks.push(path.clone());
            *slot = SinkSlot::Degraded;
          }
        }
      }
    }

    for slot in sinks.iter_mut() {
      if let SinkSlot::Open { path, file } = slot {
        if let Err(error) = file.flush().await {
          warn!(path = %path.display(), %error, "sink flush failed; degrading sink");
          report.degraded_sinks.push(path.clone());
        }
      }
    }

    report
  }
}
