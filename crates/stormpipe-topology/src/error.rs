use thiserror::Error;

/// Errors raised while compiling a run request into a topology.
///
/// All of these are fatal at compile time: nothing has been allocated and
/// no stage has been launched.
#[derive(Debug, Error)]
pub enum CompileError {
  /// The net perspective needs the financial-transformation stage.
  #[error("net perspective requested but no financial program is declared")]
  NetRequiresFinancial,

  /// Every perspective/summary combination is empty.
  #[error("run requests no outputs (no analytics and no sinks for any summary)")]
  NoOutputsRequested,

  #[error("partition count must be at least 1")]
  NoPartitions,

  /// Two summary requests resolve to the same workspace entries.
  #[error("duplicate summary level '{level}' for perspective '{perspective}'")]
  DuplicateSummary { perspective: String, level: String },

  /// An argument template failed to render.
  #[error("failed to render argument template '{template}' for stage '{stage}'")]
  ArgumentTemplate {
    stage: String,
    template: String,
    #[source]
    source: minijinja::Error,
  },

  /// The induced stage graph is not acyclic.
  #[error("stage graph contains a cycle")]
  CyclicGraph,

  /// A channel ends up with neither consumers nor persistence sinks.
  #[error("channel '{channel}' has no consumers and no sinks")]
  DanglingChannel { channel: String },
}
