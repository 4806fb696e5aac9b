//! Core types for the latency engine (JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Inbound types (JSON contract: what the caller sends)
// ---------------------------------------------------------------------------

/// One inbound line from stdin. Unknown fields are silently ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundRecord {
  PullRequest(InboundPullRequest),
  Event(InboundEvent),
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundPullRequest {
  /// PR number. Derived from `tag` when absent.
  #[serde(default)]
  pub number: Option<u64>,
  pub merge_commit_sha: String,
  pub merged_at: String,
  #[serde(default)]
  pub tag: Option<String>,
  /// Time of the earliest commit in the PR (alternative latency anchor).
  #[serde(default)]
  pub authored_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
  pub kind: String,
  pub commit: String,
  pub timestamp: String,
  /// Consumer the event belongs to, e.g. a browser name for dashboard runs.
  #[serde(default)]
  pub channel: Option<String>,
  /// Downstream identity of the event (import commit, run id).
  #[serde(default)]
  pub reference: Option<String>,
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PullRequestId(pub u64);

impl fmt::Display for PullRequestId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// A merged pull request. Immutable once normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
  pub id: PullRequestId,
  pub merge_commit: String,
  pub merged_at: DateTime<Utc>,
  /// `merge_pr_<N>` tag on the landing commit; `None` means untagged.
  pub tag: Option<String>,
  pub authored_at: Option<DateTime<Utc>>,
}

impl PullRequest {
  pub fn is_tagged(&self) -> bool {
    self.tag.is_some()
  }
}

/// PR timestamp that latency is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyAnchor {
  #[default]
  MergedAt,
  AuthoredAt,
}

impl LatencyAnchor {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "merged" | "merged_at" | "merge" => Some(Self::MergedAt),
      "authored" | "authored_at" | "commit" => Some(Self::AuthoredAt),
      _ => None,
    }
  }

  pub fn timestamp(self, pr: &PullRequest) -> Option<DateTime<Utc>> {
    match self {
      Self::MergedAt => Some(pr.merged_at),
      Self::AuthoredAt => pr.authored_at,
    }
  }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
  Import,
  Export,
  Run,
}

impl EventKind {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "import" => Some(Self::Import),
      "export" => Some(Self::Export),
      "run" | "ci" | "test_run" => Some(Self::Run),
      _ => None,
    }
  }
}

/// Canonical internal event after normalization + validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
  pub kind: EventKind,
  pub channel: Option<String>,
  pub commit: String,
  pub timestamp: DateTime<Utc>,
  pub reference: Option<String>,
}

impl Event {
  /// Key under which duplicate events collapse to the earliest one.
  pub fn identity(&self) -> (EventKind, Option<&str>, &str) {
    (self.kind, self.channel.as_deref(), self.commit.as_str())
  }

  /// Reference reported in latency records; falls back to the commit.
  pub fn display_reference(&self) -> &str {
    self.reference.as_deref().unwrap_or(&self.commit)
  }
}

/// How two events resolving to the same PR at the same instant are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
  /// Earlier position in the event list wins.
  #[default]
  InputOrder,
  /// Fewer commits between the tag and the event commit wins, then input order.
  ShortestDistance,
}

impl TieBreak {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "input" | "input_order" => Some(Self::InputOrder),
      "distance" | "shortest_distance" => Some(Self::ShortestDistance),
      _ => None,
    }
  }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Earliest event incorporating a PR and the resulting latency.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationResult {
  pub pull_request: PullRequest,
  pub event: Option<Event>,
  pub latency_minutes: Option<f64>,
}

impl CorrelationResult {
  pub fn unmatched(pull_request: PullRequest) -> Self {
    Self {
      pull_request,
      event: None,
      latency_minutes: None,
    }
  }
}

/// Descriptive statistics over one non-empty set of latencies (minutes).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
  pub count: usize,
  pub p50: f64,
  pub p90: f64,
  pub mean: f64,
  pub sla_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatBucket {
  /// `YYYY-MM` or ISO week `YYYY-Www`.
  pub period: String,
  #[serde(flatten)]
  pub stats: LatencyStats,
}

/// Statistics for everything at or after a cutoff (e.g. the current quarter).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
  pub since: DateTime<Utc>,
  #[serde(flatten)]
  pub stats: LatencyStats,
  pub out_of_sla: usize,
}

/// Coverage counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
  pub pull_requests: usize,
  pub untagged: usize,
  pub events: usize,
  pub duplicate_events: usize,
  pub resolved_events: usize,
  pub unresolvable_events: usize,
  pub unattributed_events: usize,
  pub negative_latencies: usize,
}

/// Everything one analysis run produces.
#[derive(Debug, Clone)]
pub struct Report {
  pub run_id: String,
  pub results: Vec<CorrelationResult>,
  pub buckets: Vec<StatBucket>,
  pub period: Option<PeriodSummary>,
  pub coverage: Coverage,
}
