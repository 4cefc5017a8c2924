//! Stormpipe Runtime
//!
//! Executes a compiled topology: binds every stage to its channels,
//! spawns the external processes and the fan-out/fan-in units, and drives
//! the termination barrier that certifies a run complete without losing
//! data or deadlocking.

mod barrier;
mod controller;
mod error;
mod launcher;
mod stage;

pub use barrier::SyncBarrier;
pub use controller::{RunController, RunReport, RunStatus};
pub use error::RunError;
pub use stage::{LivenessRecord, UnitId, UnitStatus};
