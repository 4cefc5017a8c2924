//! Stormpipe Topology
//!
//! Data model and graph compiler for stormpipe runs. A compiled
//! `RunTopology` is the validated, execution-ready form of a `RunRequest`:
//! every stage and channel for every partition exists, argument templates
//! are rendered, and all fan-out/fan-in points are explicit.
//!
//! The topology is built once per run and read-only thereafter; the
//! runtime crate consumes it without ever mutating it.

mod compiler;
mod error;
mod graph;
mod request;
mod spec;

pub use compiler::compile;
pub use error::CompileError;
pub use graph::Graph;
pub use request::{
  AnalyticsKind, Perspective, PerspectiveRequest, ProgramSet, ProgramTemplate, RunRequest,
  SinkKind, SummaryLevel, SummaryRequest,
};
pub use spec::{
  ChannelId, ChannelKind, ChannelSpec, ProgramSpec, RunTopology, SinkSpec, StageId, StageSpec,
  Wave,
};
