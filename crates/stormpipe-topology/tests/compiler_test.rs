//! Compiler tests: stage counts, dead-branch elimination, invariants.

use std::path::PathBuf;

use stormpipe_topology::{
  AnalyticsKind, ChannelKind, CompileError, Perspective, PerspectiveRequest, ProgramSet,
  ProgramTemplate, RunRequest, SinkKind, SummaryLevel, SummaryRequest, Wave, compile,
};

fn summary(level: &str, analytics: &[AnalyticsKind], sinks: &[SinkKind]) -> SummaryRequest {
  SummaryRequest {
    level: SummaryLevel::new(level),
    analytics: analytics.to_vec(),
    sinks: sinks.to_vec(),
  }
}

fn perspective(p: Perspective, summaries: Vec<SummaryRequest>) -> PerspectiveRequest {
  PerspectiveRequest {
    perspective: p,
    summaries,
  }
}

fn request(partitions: u32, perspectives: Vec<PerspectiveRequest>) -> RunRequest {
  RunRequest {
    partitions,
    perspectives,
    workspace: PathBuf::from("/tmp/stormpipe-test"),
    programs: ProgramSet::default(),
  }
}

/// The full request used by the larger scenarios: both perspectives, one
/// summary level, all three analytics, both sinks.
fn full_request(partitions: u32) -> RunRequest {
  let analytics = [
    AnalyticsKind::EventLossTable,
    AnalyticsKind::PeriodLossTable,
    AnalyticsKind::SummaryCsv,
  ];
  let sinks = [SinkKind::LossExceedance, SinkKind::AnnualAggregate];
  request(
    partitions,
    vec![
      perspective(
        Perspective::GroundUp,
        vec![summary("portfolio", &analytics, &sinks)],
      ),
      perspective(
        Perspective::Net,
        vec![summary("portfolio", &analytics, &sinks)],
      ),
    ],
  )
}

#[test]
fn single_partition_single_output_compiles_minimal_pipeline() {
  let request = request(
    1,
    vec![perspective(
      Perspective::GroundUp,
      vec![summary("portfolio", &[AnalyticsKind::EventLossTable], &[])],
    )],
  );
  let topology = compile(&request).unwrap();

  assert_eq!(topology.stages.len(), 5);
  let names: Vec<&str> = topology.stages.iter().map(|s| s.name.as_str()).collect();
  assert!(names.contains(&"generation[p0]"));
  assert!(names.contains(&"loss[p0]"));
  assert!(names.contains(&"summary[gul/portfolio/p0]"));
  assert!(names.contains(&"elt[gul/portfolio/p0]"));
  assert!(names.contains(&"format[gul/portfolio/elt]"));

  // One consumer everywhere: no replication anywhere in the graph.
  assert!(
    topology
      .channels
      .iter()
      .all(|c| c.kind == ChannelKind::PointToPoint)
  );
  assert_eq!(
    topology
      .channels
      .iter()
      .filter(|c| c.materialized.is_some())
      .count(),
    1
  );

  let format = topology
    .stages_in_wave(Wave::Aggregation)
    .next()
    .expect("one formatting stage");
  let output = format.output_file.as_ref().expect("report path");
  assert!(output.ends_with("output/gul_portfolio_elt.csv"));
}

#[test]
fn dead_branches_produce_no_stages() {
  let request = request(
    1,
    vec![
      perspective(
        Perspective::GroundUp,
        vec![
          summary("portfolio", &[AnalyticsKind::EventLossTable], &[]),
          summary("site", &[], &[]),
        ],
      ),
      perspective(Perspective::Net, vec![summary("portfolio", &[], &[])]),
    ],
  );
  let topology = compile(&request).unwrap();

  assert!(
    topology
      .stages
      .iter()
      .all(|s| !s.name.starts_with("financial"))
  );
  assert!(topology.stages.iter().all(|s| !s.name.contains("site")));
  assert!(topology.stages.iter().all(|s| !s.name.contains("net")));
}

#[test]
fn net_without_financial_program_is_invalid() {
  let mut request = request(
    1,
    vec![perspective(
      Perspective::Net,
      vec![summary("portfolio", &[AnalyticsKind::EventLossTable], &[])],
    )],
  );
  request.programs.financial = None;

  let err = compile(&request).unwrap_err();
  assert!(matches!(err, CompileError::NetRequiresFinancial));
}

#[test]
fn no_outputs_is_invalid() {
  let request = request(
    1,
    vec![perspective(
      Perspective::GroundUp,
      vec![summary("portfolio", &[], &[])],
    )],
  );
  assert!(matches!(
    compile(&request).unwrap_err(),
    CompileError::NoOutputsRequested
  ));
}

#[test]
fn zero_partitions_is_invalid() {
  let request = request(0, vec![]);
  assert!(matches!(
    compile(&request).unwrap_err(),
    CompileError::NoPartitions
  ));
}

#[test]
fn duplicate_summary_level_is_invalid() {
  let request = request(
    1,
    vec![perspective(
      Perspective::GroundUp,
      vec![
        summary("portfolio", &[AnalyticsKind::EventLossTable], &[]),
        summary("portfolio", &[AnalyticsKind::PeriodLossTable], &[]),
      ],
    )],
  );
  assert!(matches!(
    compile(&request).unwrap_err(),
    CompileError::DuplicateSummary { .. }
  ));
}

#[test]
fn repeated_perspective_with_same_level_is_invalid() {
  let request = request(
    1,
    vec![
      perspective(
        Perspective::GroundUp,
        vec![summary("portfolio", &[AnalyticsKind::EventLossTable], &[])],
      ),
      perspective(
        Perspective::GroundUp,
        vec![summary("portfolio", &[], &[SinkKind::LossExceedance])],
      ),
    ],
  );
  assert!(matches!(
    compile(&request).unwrap_err(),
    CompileError::DuplicateSummary { .. }
  ));
}

#[test]
fn bad_argument_template_is_invalid() {
  let mut request = full_request(1);
  request.programs.generation = ProgramTemplate::new("eve", &["{{ partition"]);
  assert!(matches!(
    compile(&request).unwrap_err(),
    CompileError::ArgumentTemplate { .. }
  ));
}

#[test]
fn compilation_is_deterministic() {
  let request = full_request(4);
  assert_eq!(compile(&request).unwrap(), compile(&request).unwrap());
}

#[test]
fn topology_is_valid_across_partition_counts() {
  for partitions in [1u32, 4, 20] {
    let topology = compile(&full_request(partitions)).unwrap();
    topology.validate().unwrap();

    // Per partition: generation, loss, financial, and per perspective one
    // summary plus three reducers; plus six formatting stages at the end.
    let per_partition = 3 + 2 * (1 + 3);
    let expected = per_partition * partitions as usize + 6;
    assert_eq!(topology.stages.len(), expected);

    // Every channel has exactly one producer and is consumed or persisted.
    for channel in &topology.channels {
      assert!(
        !channel.consumers.is_empty() || !channel.kind.sinks().is_empty(),
        "channel {} is dangling",
        channel.name
      );
    }
  }
}

#[test]
fn summary_fanouts_carry_requested_sinks() {
  let topology = compile(&full_request(4)).unwrap();
  let fanouts: Vec<_> = topology
    .channels
    .iter()
    .filter(|c| c.name.starts_with("summary["))
    .collect();
  // One summary fan-out per perspective per partition.
  assert_eq!(fanouts.len(), 8);
  for channel in fanouts {
    assert_eq!(channel.kind.sinks().len(), 2);
    assert_eq!(channel.consumers.len(), 3);
  }
}

#[test]
fn reducer_feeds_are_materialized_fan_in_when_partitioned() {
  let topology = compile(&full_request(4)).unwrap();
  let feeds: Vec<_> = topology
    .channels
    .iter()
    .filter(|c| c.materialized.is_some())
    .collect();
  // 4 partitions x 2 perspectives x 3 analytics.
  assert_eq!(feeds.len(), 24);
  for channel in feeds {
    assert_eq!(channel.kind, ChannelKind::FanInMultiplex);
    let consumer = topology.stage(channel.consumers[0]);
    assert_eq!(consumer.wave, Wave::Aggregation);
  }
}

#[test]
fn layers_put_generation_first_and_formatting_last() {
  let topology = compile(&full_request(4)).unwrap();
  let layers = topology.layers().unwrap();

  for stage in &layers[0] {
    assert!(topology.stage(*stage).name.starts_with("generation"));
  }
  let last = layers.last().unwrap();
  for stage in last {
    assert!(topology.stage(*stage).name.starts_with("format"));
  }
}
