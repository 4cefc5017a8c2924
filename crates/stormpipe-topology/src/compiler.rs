//! The graph compiler.
//!
//! Expands a `RunRequest` into the full per-partition stage/channel
//! topology: generation -> loss -> (financial) -> summary per
//! (perspective, summary level) -> replicated fan-out into analytics
//! reducers and persistence sinks -> materialized per-partition feeds ->
//! one formatting stage per requested report.
//!
//! Compilation is pure and deterministic: the same request always yields
//! an isomorphic topology. Dead branches (a summary with no analytics and
//! no sinks, a perspective with no live summaries) are eliminated here,
//! not at run time.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use minijinja::{Environment, Value, context};
use tracing::debug;

use crate::error::CompileError;
use crate::request::{
  AnalyticsKind, Perspective, PerspectiveRequest, ProgramTemplate, RunRequest, SummaryLevel,
};
use crate::spec::{
  ChannelId, ChannelKind, ChannelSpec, ProgramSpec, RunTopology, SinkSpec, StageId, StageSpec,
  Wave,
};

/// Compile a run request into a validated topology.
pub fn compile(request: &RunRequest) -> Result<RunTopology, CompileError> {
  if request.partitions == 0 {
    return Err(CompileError::NoPartitions);
  }

  let live: Vec<_> = request
    .perspectives
    .iter()
    .filter(|p| p.live_summaries().next().is_some())
    .collect();
  if live.is_empty() {
    return Err(CompileError::NoOutputsRequested);
  }
  if live.iter().any(|p| p.perspective == Perspective::Net) && request.programs.financial.is_none()
  {
    return Err(CompileError::NetRequiresFinancial);
  }
  // A repeated (perspective, level) pair would collide on its workspace
  // entries; reject it here rather than at allocation time.
  let mut seen = HashSet::new();
  for perspective in &live {
    for summary in perspective.live_summaries() {
      if !seen.insert((perspective.perspective, summary.level.clone())) {
        return Err(CompileError::DuplicateSummary {
          perspective: perspective.perspective.label().to_string(),
          level: summary.level.name().to_string(),
        });
      }
    }
  }

  let mut builder = TopologyBuilder::new(request);
  for partition in 0..request.partitions {
    builder.build_partition(partition)?;
  }
  builder.build_aggregation()?;

  let topology = builder.finish();
  topology.validate()?;

  debug!(
    stages = topology.stages.len(),
    channels = topology.channels.len(),
    partitions = request.partitions,
    "topology compiled"
  );
  Ok(topology)
}

struct TopologyBuilder<'a> {
  request: &'a RunRequest,
  env: Environment<'static>,
  workspace: String,
  stages: Vec<StageSpec>,
  channels: Vec<ChannelSpec>,
  /// Materialized reducer feeds per report, in partition order.
  reduced: BTreeMap<(Perspective, SummaryLevel, AnalyticsKind), Vec<ChannelId>>,
}

impl<'a> TopologyBuilder<'a> {
  fn new(request: &'a RunRequest) -> Self {
    Self {
      request,
      env: Environment::new(),
      workspace: request.workspace.display().to_string(),
      stages: Vec::new(),
      channels: Vec::new(),
      reduced: BTreeMap::new(),
    }
  }

  fn work_file(&self, name: String) -> PathBuf {
    self.request.workspace.join("work").join(name)
  }

  fn output_file(&self, name: String) -> PathBuf {
    self.request.workspace.join("output").join(name)
  }

  fn add_stage(
    &mut self,
    name: String,
    partition: Option<u32>,
    program: ProgramSpec,
    wave: Wave,
  ) -> StageId {
    let id = StageId(self.stages.len());
    self.stages.push(StageSpec {
      id,
      name,
      partition,
      program,
      inputs: Vec::new(),
      outputs: Vec::new(),
      wave,
      output_file: None,
    });
    id
  }

  fn add_channel(
    &mut self,
    name: String,
    kind: ChannelKind,
    producer: StageId,
    materialized: Option<PathBuf>,
  ) -> ChannelId {
    let id = ChannelId(self.channels.len());
    self.channels.push(ChannelSpec {
      id,
      name,
      kind,
      producer,
      consumers: Vec::new(),
      materialized,
    });
    self.stages[producer.0].outputs.push(id);
    id
  }

  fn connect(&mut self, channel: ChannelId, consumer: StageId) {
    self.channels[channel.0].consumers.push(consumer);
    self.stages[consumer.0].inputs.push(channel);
  }

  fn render(
    &self,
    stage: &str,
    template: &ProgramTemplate,
    ctx: &Value,
  ) -> Result<ProgramSpec, CompileError> {
    let mut args = Vec::with_capacity(template.args.len());
    for arg in &template.args {
      let rendered =
        self
          .env
          .render_str(arg, ctx)
          .map_err(|e| CompileError::ArgumentTemplate {
            stage: stage.to_string(),
            template: arg.clone(),
            source: e,
          })?;
      args.push(rendered);
    }
    Ok(ProgramSpec {
      command: template.command.clone(),
      args,
    })
  }

  /// One partition's pipeline: generation feeds loss; the loss stream
  /// fans out to the ground-up branch and, when net outputs are live, to
  /// the financial stage feeding the net branch.
  fn build_partition(&mut self, partition: u32) -> Result<(), CompileError> {
    let ctx = context! {
      partition => partition,
      partitions => self.request.partitions,
      workspace => self.workspace.clone(),
    };

    let gen_name = format!("generation[p{partition}]");
    let gen_program = self.render(&gen_name, &self.request.programs.generation, &ctx)?;
    let generation = self.add_stage(gen_name, Some(partition), gen_program, Wave::PerPartition);
    let events = self.add_channel(
      format!("events[p{partition}]"),
      ChannelKind::PointToPoint,
      generation,
      None,
    );

    let loss_name = format!("loss[p{partition}]");
    let loss_program = self.render(&loss_name, &self.request.programs.loss, &ctx)?;
    let loss = self.add_stage(loss_name, Some(partition), loss_program, Wave::PerPartition);
    self.connect(events, loss);
    let loss_out = self.add_channel(
      format!("loss[p{partition}]"),
      ChannelKind::Fanout { sinks: Vec::new() },
      loss,
      None,
    );

    let mut net_source: Option<ChannelId> = None;
    let perspectives = self.request.perspectives.clone();
    for perspective in &perspectives {
      if perspective.live_summaries().next().is_none() {
        continue;
      }
      let source = match perspective.perspective {
        Perspective::GroundUp => loss_out,
        Perspective::Net => match net_source {
          Some(channel) => channel,
          None => {
            let channel = self.build_financial(partition, loss_out)?;
            net_source = Some(channel);
            channel
          }
        },
      };
      self.build_summary_branch(partition, perspective, source)?;
    }

    Ok(())
  }

  fn build_financial(
    &mut self,
    partition: u32,
    source: ChannelId,
  ) -> Result<ChannelId, CompileError> {
    let template = self
      .request
      .programs
      .financial
      .as_ref()
      .ok_or(CompileError::NetRequiresFinancial)?
      .clone();
    let ctx = context! {
      partition => partition,
      partitions => self.request.partitions,
      perspective => Perspective::Net.label(),
      workspace => self.workspace.clone(),
    };
    let name = format!("financial[p{partition}]");
    let program = self.render(&name, &template, &ctx)?;
    let financial = self.add_stage(name, Some(partition), program, Wave::PerPartition);
    self.connect(source, financial);
    Ok(self.add_channel(
      format!("net[p{partition}]"),
      ChannelKind::Fanout { sinks: Vec::new() },
      financial,
      None,
    ))
  }

  /// Summary stages for one perspective, with their replicated fan-outs
  /// into analytics reducers and persistence sinks.
  fn build_summary_branch(
    &mut self,
    partition: u32,
    request: &PerspectiveRequest,
    source: ChannelId,
  ) -> Result<(), CompileError> {
    let perspective = request.perspective;
    for summary in request.live_summaries() {
      let tag = format!("{}/{}/p{}", perspective.label(), summary.level.name(), partition);
      let ctx = context! {
        partition => partition,
        partitions => self.request.partitions,
        perspective => perspective.label(),
        summary_level => summary.level.name(),
        workspace => self.workspace.clone(),
      };

      let name = format!("summary[{tag}]");
      let program = self.render(&name, &self.request.programs.summary, &ctx)?;
      let stage = self.add_stage(name, Some(partition), program, Wave::PerPartition);
      self.connect(source, stage);

      let sinks = summary
        .sinks
        .iter()
        .map(|kind| SinkSpec {
          kind: *kind,
          path: self.work_file(format!(
            "{}_{}_{}_p{}.bin",
            perspective.label(),
            summary.level.name(),
            kind.label(),
            partition
          )),
        })
        .collect();
      let fanout = self.add_channel(
        format!("summary[{tag}]"),
        ChannelKind::Fanout { sinks },
        stage,
        None,
      );

      for kind in &summary.analytics {
        let reducer_name = format!("{}[{tag}]", kind.label());
        let ctx = context! {
          partition => partition,
          partitions => self.request.partitions,
          perspective => perspective.label(),
          summary_level => summary.level.name(),
          analytics => kind.label(),
          workspace => self.workspace.clone(),
        };
        let program = self.render(&reducer_name, self.request.programs.analytics(*kind), &ctx)?;
        let reducer = self.add_stage(reducer_name, Some(partition), program, Wave::PerPartition);
        self.connect(fanout, reducer);

        let path = self.work_file(format!(
          "{}_{}_{}_p{}.bin",
          perspective.label(),
          summary.level.name(),
          kind.label(),
          partition
        ));
        let kind_for_feed = if self.request.partitions > 1 {
          ChannelKind::FanInMultiplex
        } else {
          ChannelKind::PointToPoint
        };
        let feed = self.add_channel(
          format!("{}[{tag}]", kind.label()),
          kind_for_feed,
          reducer,
          Some(path),
        );
        self
          .reduced
          .entry((perspective, summary.level.clone(), *kind))
          .or_default()
          .push(feed);
      }
    }

    Ok(())
  }

  /// One formatting stage per requested report, consuming the
  /// materialized per-partition feeds across the wave boundary.
  fn build_aggregation(&mut self) -> Result<(), CompileError> {
    let reduced = std::mem::take(&mut self.reduced);
    for ((perspective, level, kind), feeds) in reduced {
      let output = self.output_file(format!(
        "{}_{}_{}.csv",
        perspective.label(),
        level.name(),
        kind.label()
      ));
      let name = format!(
        "format[{}/{}/{}]",
        perspective.label(),
        level.name(),
        kind.label()
      );
      let ctx = context! {
        partitions => self.request.partitions,
        perspective => perspective.label(),
        summary_level => level.name(),
        analytics => kind.label(),
        workspace => self.workspace.clone(),
        output => output.display().to_string(),
      };
      let program = self.render(&name, &self.request.programs.format, &ctx)?;
      let stage = self.add_stage(name, None, program, Wave::Aggregation);
      self.stages[stage.0].output_file = Some(output);
      for feed in feeds {
        self.connect(feed, stage);
      }
    }
    Ok(())
  }

  fn finish(mut self) -> RunTopology {
    // A replicated channel with a single consumer and no sinks needs no
    // replication at all.
    for channel in &mut self.channels {
      if let ChannelKind::Fanout { sinks } = &channel.kind {
        if sinks.is_empty() && channel.consumers.len() == 1 {
          channel.kind = ChannelKind::PointToPoint;
        }
      }
    }
    RunTopology {
      stages: self.stages,
      channels: self.channels,
    }
  }
}
