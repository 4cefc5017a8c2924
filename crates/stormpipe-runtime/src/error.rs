//! Runtime errors.

use stormpipe_channel::AllocationError;
use stormpipe_topology::CompileError;

/// Errors that abort a run before or during execution.
///
/// Stage-level failures (non-zero exits, launch failures, stalls) are not
/// errors at this level: the controller keeps monitoring siblings and
/// aggregates them into the run report instead.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
  /// The requested outputs cannot be compiled into a topology.
  #[error("invalid run specification")]
  InvalidSpec(#[from] CompileError),

  /// A channel or workspace entry could not be created; nothing was
  /// launched.
  #[error("channel allocation failed")]
  Allocation(#[from] AllocationError),

  /// The run was cancelled.
  #[error("run cancelled")]
  Cancelled,
}
