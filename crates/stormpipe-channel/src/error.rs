use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while creating channel primitives and workspace entries.
///
/// Any of these aborts the run before a single stage is launched.
#[derive(Debug, Error)]
pub enum AllocationError {
  /// A workspace namespace path exists but is not a directory.
  #[error("path collision at '{}': exists and is not a directory", path.display())]
  PathCollision { path: PathBuf },

  /// Two channels or sinks resolved to the same workspace entry.
  #[error("duplicate workspace entry '{}'", path.display())]
  DuplicateEntry { path: PathBuf },

  #[error("failed to prepare workspace directory '{}'", path.display())]
  Workspace {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to create workspace entry '{}'", path.display())]
  Entry {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Errors raised by the fan-in bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
  /// The combined output's reader went away before all input was
  /// forwarded.
  #[error("fan-in output closed before all input was forwarded")]
  OutputClosed,

  #[error("failed to read fan-in source '{}'", path.display())]
  Source {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}
