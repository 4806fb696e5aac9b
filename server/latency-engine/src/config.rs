//! Engine configuration with sane defaults.

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::stats::{BucketReference, Granularity};
use crate::types::{LatencyAnchor, TieBreak};

/// How event commits are mapped onto pull requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// One "describe nearest tag" oracle call per event.
  Describe,
  /// Binary search over the verified tag index with the ancestor comparator.
  BinarySearch,
}

impl Strategy {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "describe" => Some(Self::Describe),
      "binary" | "binary_search" | "bisect" => Some(Self::BinarySearch),
      _ => None,
    }
  }
}

/// Tunable knobs for one analysis run.
#[derive(Debug, Clone)]
pub struct Config {
  /// SLA target in minutes; latencies at or below count as compliant.
  pub sla_threshold_minutes: f64,
  /// Calendar period used for bucketing.
  pub granularity: Granularity,
  /// Which timestamp decides the bucket of a result.
  pub bucket_reference: BucketReference,
  /// Which PR timestamp latency is measured from.
  pub anchor: LatencyAnchor,
  /// Secondary key when two events resolve to the same PR at the same time.
  pub tie_break: TieBreak,
  pub strategy: Strategy,
  /// Tag prefix; the remainder of the tag name is the PR number.
  pub tag_prefix: String,
  /// Validate merge-date order against ancestry order before correlating.
  /// Always on for `Strategy::BinarySearch`.
  pub verify_ordering: bool,
  /// PRs merged before this instant are ignored.
  pub cutoff: Option<DateTime<Utc>>,
  /// Start of the "current period" summary (e.g. quarter start).
  pub period_start: Option<DateTime<Utc>>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      sla_threshold_minutes: 12.0 * 60.0,
      granularity: Granularity::Month,
      bucket_reference: BucketReference::Event,
      anchor: LatencyAnchor::MergedAt,
      tie_break: TieBreak::InputOrder,
      strategy: Strategy::Describe,
      tag_prefix: "merge_pr_".into(),
      verify_ordering: true,
      cutoff: None,
      period_start: None,
    }
  }
}

impl Config {
  pub fn must_verify_ordering(&self) -> bool {
    self.verify_ordering || self.strategy == Strategy::BinarySearch
  }

  /// Overlay settings from `LATENCY_*` environment variables.
  pub fn from_env() -> Result<Self, EngineError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Same as [`Config::from_env`] with an injectable lookup.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();

    if let Some(v) = lookup("LATENCY_SLA_MINUTES") {
      let minutes: f64 = v
        .trim()
        .parse()
        .map_err(|_| EngineError::validation("LATENCY_SLA_MINUTES", "expected a number of minutes"))?;
      if !minutes.is_finite() || minutes < 0.0 {
        return Err(EngineError::validation("LATENCY_SLA_MINUTES", "must be a non-negative number"));
      }
      config.sla_threshold_minutes = minutes;
    }
    if let Some(v) = lookup("LATENCY_GRANULARITY") {
      config.granularity = Granularity::from_str_loose(&v)
        .ok_or_else(|| EngineError::validation("LATENCY_GRANULARITY", "expected month|week"))?;
    }
    if let Some(v) = lookup("LATENCY_BUCKET_BY") {
      config.bucket_reference = BucketReference::from_str_loose(&v)
        .ok_or_else(|| EngineError::validation("LATENCY_BUCKET_BY", "expected merge|event"))?;
    }
    if let Some(v) = lookup("LATENCY_ANCHOR") {
      config.anchor = LatencyAnchor::from_str_loose(&v)
        .ok_or_else(|| EngineError::validation("LATENCY_ANCHOR", "expected merged|authored"))?;
    }
    if let Some(v) = lookup("LATENCY_TIE_BREAK") {
      config.tie_break = TieBreak::from_str_loose(&v)
        .ok_or_else(|| EngineError::validation("LATENCY_TIE_BREAK", "expected input|distance"))?;
    }
    if let Some(v) = lookup("LATENCY_STRATEGY") {
      config.strategy = Strategy::from_str_loose(&v)
        .ok_or_else(|| EngineError::validation("LATENCY_STRATEGY", "expected describe|binary"))?;
    }
    if let Some(v) = lookup("LATENCY_TAG_PREFIX") {
      if v.is_empty() {
        return Err(EngineError::validation("LATENCY_TAG_PREFIX", "must not be empty"));
      }
      config.tag_prefix = v;
    }
    if let Some(v) = lookup("LATENCY_CUTOFF") {
      config.cutoff = Some(parse_instant("LATENCY_CUTOFF", &v)?);
    }
    if let Some(v) = lookup("LATENCY_PERIOD_START") {
      config.period_start = Some(parse_instant("LATENCY_PERIOD_START", &v)?);
    }

    Ok(config)
  }
}

fn parse_instant(field: &str, raw: &str) -> Result<DateTime<Utc>, EngineError> {
  DateTime::parse_from_rfc3339(raw.trim())
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| EngineError::validation(field, &format!("invalid RFC3339: {}", e)))
}
