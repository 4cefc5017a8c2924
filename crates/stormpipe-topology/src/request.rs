use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A named viewpoint on loss, each requiring its own stage sub-chain.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
  /// Losses before any financial terms are applied.
  GroundUp,
  /// Losses net of financial terms; needs the financial stage.
  Net,
}

impl Perspective {
  pub fn label(&self) -> &'static str {
    match self {
      Perspective::GroundUp => "gul",
      Perspective::Net => "net",
    }
  }
}

/// An analytics reduction applied to a summary stream.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsKind {
  EventLossTable,
  PeriodLossTable,
  SummaryCsv,
}

impl AnalyticsKind {
  pub fn label(&self) -> &'static str {
    match self {
      AnalyticsKind::EventLossTable => "elt",
      AnalyticsKind::PeriodLossTable => "plt",
      AnalyticsKind::SummaryCsv => "summary",
    }
  }
}

/// A persistence sink attached to a summary fan-out.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
  /// Materialized input for loss-exceedance curves.
  LossExceedance,
  /// Materialized input for annual aggregate statistics.
  AnnualAggregate,
}

impl SinkKind {
  pub fn label(&self) -> &'static str {
    match self {
      SinkKind::LossExceedance => "lec",
      SinkKind::AnnualAggregate => "aal",
    }
  }
}

/// A grouping key at which losses are aggregated before analytics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SummaryLevel(pub String);

impl SummaryLevel {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn name(&self) -> &str {
    &self.0
  }
}

/// An external program plus argument templates.
///
/// Arguments are minijinja templates rendered at compile time with
/// `partition`, `partitions`, `perspective`, `summary_level`, `analytics`,
/// `workspace` and `output` in scope (only the values that apply to the
/// stage are defined; the rest render empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramTemplate {
  pub command: String,
  #[serde(default)]
  pub args: Vec<String>,
}

impl ProgramTemplate {
  pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
    Self {
      command: command.into(),
      args: args.iter().map(|a| a.to_string()).collect(),
    }
  }
}

/// The external program set for one run.
///
/// Defaults mirror the original toolchain's binary names; every entry can
/// be overridden from the settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSet {
  pub generation: ProgramTemplate,
  pub loss: ProgramTemplate,
  #[serde(default)]
  pub financial: Option<ProgramTemplate>,
  pub summary: ProgramTemplate,
  pub event_loss_table: ProgramTemplate,
  pub period_loss_table: ProgramTemplate,
  pub summary_csv: ProgramTemplate,
  pub format: ProgramTemplate,
}

impl Default for ProgramSet {
  fn default() -> Self {
    Self {
      generation: ProgramTemplate::new("eve", &["{{ partition }}", "{{ partitions }}"]),
      loss: ProgramTemplate::new("gulcalc", &[]),
      financial: Some(ProgramTemplate::new("fmcalc", &[])),
      summary: ProgramTemplate::new("summarycalc", &["-{{ perspective }}"]),
      event_loss_table: ProgramTemplate::new("eltcalc", &[]),
      period_loss_table: ProgramTemplate::new("pltcalc", &[]),
      summary_csv: ProgramTemplate::new("summarycsv", &[]),
      format: ProgramTemplate::new("reportcsv", &["{{ output }}"]),
    }
  }
}

impl ProgramSet {
  /// The reducer program for an analytics kind.
  pub fn analytics(&self, kind: AnalyticsKind) -> &ProgramTemplate {
    match kind {
      AnalyticsKind::EventLossTable => &self.event_loss_table,
      AnalyticsKind::PeriodLossTable => &self.period_loss_table,
      AnalyticsKind::SummaryCsv => &self.summary_csv,
    }
  }
}

/// Outputs requested at one summary level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRequest {
  pub level: SummaryLevel,
  #[serde(default)]
  pub analytics: Vec<AnalyticsKind>,
  #[serde(default)]
  pub sinks: Vec<SinkKind>,
}

impl SummaryRequest {
  /// A summary with no analytics and no sinks compiles to nothing.
  pub fn is_live(&self) -> bool {
    !self.analytics.is_empty() || !self.sinks.is_empty()
  }
}

/// Outputs requested for one loss perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveRequest {
  pub perspective: Perspective,
  pub summaries: Vec<SummaryRequest>,
}

impl PerspectiveRequest {
  pub fn live_summaries(&self) -> impl Iterator<Item = &SummaryRequest> {
    self.summaries.iter().filter(|s| s.is_live())
  }
}

/// Everything needed to compile one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
  /// Horizontal shard count for the event stream.
  pub partitions: u32,
  pub perspectives: Vec<PerspectiveRequest>,
  /// Workspace root; `work/` and `output/` live underneath it.
  pub workspace: PathBuf,
  #[serde(default)]
  pub programs: ProgramSet,
}
