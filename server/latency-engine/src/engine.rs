//! Core engine: one analysis run from pull requests + events to a report.

use std::collections::BTreeMap;

use crate::ancestry::{AncestryOracle, AncestryResolver, TagIndex};
use crate::config::{Config, Strategy};
use crate::correlation::Correlator;
use crate::error::EngineError;
use crate::normalize;
use crate::stats::{self, BucketSpec};
use crate::types::*;

/// Supplies the landed pull requests for a run.
pub trait PullRequestSource {
  fn list_pull_requests(&self) -> Result<Vec<PullRequest>, EngineError>;
}

impl PullRequestSource for [PullRequest] {
  fn list_pull_requests(&self) -> Result<Vec<PullRequest>, EngineError> {
    Ok(self.to_vec())
  }
}

impl PullRequestSource for Vec<PullRequest> {
  fn list_pull_requests(&self) -> Result<Vec<PullRequest>, EngineError> {
    Ok(self.clone())
  }
}

/// Channel name used for events without one.
pub const DEFAULT_CHANNEL: &str = "default";

/// The latency engine. Stateless between runs; every run builds its own
/// resolver context.
pub struct Engine {
  config: Config,
}

impl Engine {
  pub fn new(config: Config) -> Self {
    Self { config }
  }

  pub fn with_defaults() -> Self {
    Self::new(Config::default())
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Fetch pull requests from `source` and analyze them against `events`.
  pub fn analyze_source(
    &self,
    source: &dyn PullRequestSource,
    oracle: &dyn AncestryOracle,
    events: Vec<Event>,
  ) -> Result<Report, EngineError> {
    let pull_requests = source.list_pull_requests()?;
    self.analyze(oracle, pull_requests, events)
  }

  /// Run one analysis. Either returns a complete report or fails; nothing
  /// partial is produced.
  pub fn analyze(
    &self,
    oracle: &dyn AncestryOracle,
    pull_requests: Vec<PullRequest>,
    events: Vec<Event>,
  ) -> Result<Report, EngineError> {
    normalize::check_unique(&pull_requests)?;

    let run_id = run_id(&pull_requests, &events);
    let span = tracing::info_span!("latency.run", run_id = %run_id);
    let _guard = span.enter();

    let mut coverage = Coverage {
      events: events.len(),
      ..Coverage::default()
    };

    let pull_requests = normalize::apply_cutoff(pull_requests, self.config.cutoff);
    let (tagged, untagged): (Vec<PullRequest>, Vec<PullRequest>) =
      pull_requests.into_iter().partition(PullRequest::is_tagged);
    coverage.pull_requests = tagged.len();
    coverage.untagged = untagged.len();
    if !untagged.is_empty() {
      tracing::info!(count = untagged.len(), "untagged PRs excluded from correlation");
    }

    let (events, duplicates) = normalize::dedupe_events(events);
    coverage.duplicate_events = duplicates;

    let index;
    let resolver = match self.config.strategy {
      Strategy::Describe => AncestryResolver::describe(oracle, self.config.tag_prefix.clone()),
      Strategy::BinarySearch => {
        index = TagIndex::build(&tagged, oracle)?;
        AncestryResolver::binary_search(oracle, &index)
      }
    };

    let correlation = Correlator::new(&resolver, &self.config).run(&tagged, &events)?;
    coverage.resolved_events = correlation.resolved_events;
    coverage.unresolvable_events = correlation.unresolvable_events;
    coverage.unattributed_events = correlation.unattributed_events;
    coverage.negative_latencies = correlation.negative_latencies;
    let results = correlation.results;

    let spec = BucketSpec {
      granularity: self.config.granularity,
      reference: self.config.bucket_reference,
    };
    let sla = self.config.sla_threshold_minutes;
    let buckets = stats::aggregate(&results, |r| spec.key(r), sla)?;
    let period = match self.config.period_start {
      Some(since) => stats::summarize_since(&results, since, spec.reference, sla)?,
      None => None,
    };

    tracing::info!(
      prs = coverage.pull_requests,
      events = coverage.events,
      resolved = coverage.resolved_events,
      skipped = coverage.unresolvable_events,
      negative = coverage.negative_latencies,
      buckets = buckets.len(),
      "analysis complete"
    );

    Ok(Report {
      run_id,
      results,
      buckets,
      period,
      coverage,
    })
  }

  /// One independent run per event channel (e.g. per browser). Events
  /// without a channel share [`DEFAULT_CHANNEL`].
  pub fn analyze_by_channel(
    &self,
    oracle: &dyn AncestryOracle,
    pull_requests: &[PullRequest],
    events: Vec<Event>,
  ) -> Result<BTreeMap<String, Report>, EngineError> {
    let mut by_channel: BTreeMap<String, Vec<Event>> = BTreeMap::new();
    for event in events {
      let channel = event
        .channel
        .clone()
        .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
      by_channel.entry(channel).or_default().push(event);
    }

    by_channel
      .into_iter()
      .map(|(channel, events)| {
        let report = self.analyze(oracle, pull_requests.to_vec(), events)?;
        Ok((channel, report))
      })
      .collect()
  }
}

/// Stable run id: hash of every PR and event that went into the run.
fn run_id(pull_requests: &[PullRequest], events: &[Event]) -> String {
  let mut hasher = blake3::Hasher::new();
  for pr in pull_requests {
    hasher.update(b"pr|");
    hasher.update(&pr.id.0.to_le_bytes());
    hasher.update(b"|");
    hasher.update(pr.merge_commit.as_bytes());
    hasher.update(b"|");
    hasher.update(pr.merged_at.to_rfc3339().as_bytes());
    hasher.update(b"\n");
  }
  for event in events {
    hasher.update(b"ev|");
    hasher.update(format!("{:?}", event.kind).as_bytes());
    hasher.update(b"|");
    hasher.update(event.channel.as_deref().unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(event.commit.as_bytes());
    hasher.update(b"|");
    hasher.update(event.timestamp.to_rfc3339().as_bytes());
    hasher.update(b"\n");
  }
  let hex = hasher.finalize().to_hex();
  format!("run-{}", &hex[..16])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memory::MemoryGraph;
  use crate::stats::Granularity;
  use chrono::{DateTime, Duration, TimeZone, Utc};

  fn at(min: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 5, 1, 9, 0, 0).unwrap() + Duration::minutes(min)
  }

  fn pr(n: u64, commit: &str, merged_min: i64, tagged: bool) -> PullRequest {
    PullRequest {
      id: PullRequestId(n),
      merge_commit: commit.into(),
      merged_at: at(merged_min),
      tag: tagged.then(|| format!("merge_pr_{}", n)),
      authored_at: None,
    }
  }

  fn event(commit: &str, min: i64, channel: Option<&str>) -> Event {
    Event {
      kind: EventKind::Run,
      channel: channel.map(String::from),
      commit: commit.into(),
      timestamp: at(min),
      reference: None,
    }
  }

  fn graph() -> MemoryGraph {
    MemoryGraph::linear(&["root", "p1", "p2", "p3"])
      .with_tag("p1", "merge_pr_1")
      .with_tag("p3", "merge_pr_3")
  }

  #[test]
  fn untagged_prs_are_excluded() {
    let engine = Engine::with_defaults();
    let prs = vec![pr(1, "p1", 0, true), pr(2, "p2", 10, false), pr(3, "p3", 20, true)];
    let report = engine
      .analyze(&graph(), prs, vec![event("p3", 50, None)])
      .unwrap();
    assert_eq!(report.coverage.untagged, 1);
    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|r| r.pull_request.id != PullRequestId(2)));
    assert_eq!(report.results[0].latency_minutes, Some(50.0));
  }

  #[test]
  fn duplicate_events_collapse_before_correlation() {
    let engine = Engine::with_defaults();
    let prs = vec![pr(1, "p1", 0, true)];
    let events = vec![event("p1", 40, Some("chrome")), event("p1", 20, Some("chrome"))];
    let report = engine.analyze(&graph(), prs, events).unwrap();
    assert_eq!(report.coverage.duplicate_events, 1);
    assert_eq!(report.results[0].latency_minutes, Some(20.0));
  }

  #[test]
  fn strategies_produce_identical_reports() {
    let prs = vec![pr(1, "p1", 0, true), pr(3, "p3", 20, true)];
    let events = vec![
      event("p2", 15, None),
      event("nope", 20, None),
      event("p3", 45, None),
    ];

    let describe = Engine::with_defaults()
      .analyze(&graph(), prs.clone(), events.clone())
      .unwrap();
    let search = Engine::new(Config {
      strategy: Strategy::BinarySearch,
      ..Config::default()
    })
    .analyze(&graph(), prs, events)
    .unwrap();
    assert_eq!(describe.results, search.results);
    assert_eq!(describe.buckets, search.buckets);
    assert_eq!(describe.run_id, search.run_id);
    // Unknown commits surface through nearest_tag for describe and through
    // the ancestor comparator for binary search; both skip the event.
    assert_eq!(describe.coverage.unresolvable_events, 1);
    assert_eq!(search.coverage.unresolvable_events, 1);
    assert_eq!(search.coverage.resolved_events, 2);
  }

  #[test]
  fn period_summary_when_configured() {
    let engine = Engine::new(Config {
      period_start: Some(at(5)),
      bucket_reference: stats::BucketReference::PullRequestMerge,
      granularity: Granularity::IsoWeek,
      ..Config::default()
    });
    let prs = vec![pr(1, "p1", 0, true), pr(3, "p3", 20, true)];
    let report = engine
      .analyze(&graph(), prs, vec![event("p3", 50, None)])
      .unwrap();
    let period = report.period.unwrap();
    assert_eq!(period.stats.count, 1);
    assert_eq!(period.stats.mean, 30.0);
    assert_eq!(report.buckets.len(), 1);
    assert_eq!(report.buckets[0].period, "2018-W18");
  }

  #[test]
  fn cutoff_drops_old_prs() {
    let engine = Engine::new(Config {
      cutoff: Some(at(5)),
      ..Config::default()
    });
    let prs = vec![pr(1, "p1", 0, true), pr(3, "p3", 20, true)];
    let report = engine
      .analyze(&graph(), prs, vec![event("p3", 50, None)])
      .unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].pull_request.id, PullRequestId(3));
  }

  #[test]
  fn run_id_is_stable() {
    let prs = vec![pr(1, "p1", 0, true)];
    let events = vec![event("p1", 10, None)];
    let a = Engine::with_defaults()
      .analyze(&graph(), prs.clone(), events.clone())
      .unwrap();
    let b = Engine::with_defaults().analyze(&graph(), prs, events).unwrap();
    assert!(a.run_id.starts_with("run-"));
    assert_eq!(a.run_id, b.run_id);
  }

  #[test]
  fn channels_are_analyzed_independently() {
    let engine = Engine::with_defaults();
    let prs = vec![pr(1, "p1", 0, true), pr(3, "p3", 20, true)];
    let events = vec![
      event("p3", 30, Some("chrome")),
      event("p1", 90, Some("firefox")),
      event("p3", 200, None),
    ];
    let reports = engine.analyze_by_channel(&graph(), &prs, events).unwrap();
    let names: Vec<&str> = reports.keys().map(String::as_str).collect();
    assert_eq!(names, ["chrome", DEFAULT_CHANNEL, "firefox"]);
    assert_eq!(reports["chrome"].results[0].latency_minutes, Some(30.0));
    assert_eq!(reports["firefox"].results[0].latency_minutes, Some(90.0));
    assert_eq!(reports["firefox"].results[1].latency_minutes, None);
  }

  #[test]
  fn source_trait_feeds_analysis() {
    let prs = vec![pr(1, "p1", 0, true)];
    let report = Engine::with_defaults()
      .analyze_source(&prs, &graph(), vec![event("p1", 10, None)])
      .unwrap();
    assert_eq!(report.results[0].latency_minutes, Some(10.0));
  }
}
