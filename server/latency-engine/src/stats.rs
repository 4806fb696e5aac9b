//! Latency aggregation: calendar bucketing, percentiles, SLA compliance.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};

use crate::error::EngineError;
use crate::types::{CorrelationResult, LatencyStats, PeriodSummary, StatBucket};

/// Format a timestamp into a month bucket key: "YYYY-MM".
pub fn month_bucket(ts: &DateTime<Utc>) -> String {
  ts.format("%Y-%m").to_string()
}

/// Format a timestamp into an ISO week bucket key: "YYYY-Www".
pub fn week_bucket(ts: &DateTime<Utc>) -> String {
  let week = ts.iso_week();
  format!("{}-W{:02}", week.year(), week.week())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
  Month,
  IsoWeek,
}

impl Granularity {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "month" | "monthly" => Some(Self::Month),
      "week" | "weekly" | "iso_week" => Some(Self::IsoWeek),
      _ => None,
    }
  }

  pub fn key(self, ts: &DateTime<Utc>) -> String {
    match self {
      Self::Month => month_bucket(ts),
      Self::IsoWeek => week_bucket(ts),
    }
  }
}

/// Which timestamp of a result places it in a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketReference {
  PullRequestMerge,
  Event,
}

impl BucketReference {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "merge" | "pr" | "pull_request" => Some(Self::PullRequestMerge),
      "event" => Some(Self::Event),
      _ => None,
    }
  }

  pub fn timestamp(self, result: &CorrelationResult) -> Option<DateTime<Utc>> {
    match self {
      Self::PullRequestMerge => Some(result.pull_request.merged_at),
      Self::Event => result.event.as_ref().map(|e| e.timestamp),
    }
  }
}

/// Standard bucket key function: granularity applied to the reference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpec {
  pub granularity: Granularity,
  pub reference: BucketReference,
}

impl BucketSpec {
  pub fn key(&self, result: &CorrelationResult) -> Option<String> {
    self
      .reference
      .timestamp(result)
      .map(|ts| self.granularity.key(&ts))
  }
}

/// Percentile of an ascending slice by linear interpolation between the
/// closest ranks. `pct` is in 0..=100.
pub fn percentile(sorted: &[f64], pct: f64) -> Result<f64, EngineError> {
  if sorted.is_empty() {
    return Err(EngineError::EmptyBucket);
  }
  if sorted.len() == 1 {
    return Ok(sorted[0]);
  }
  let pos = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
  let lo = pos.floor() as usize;
  let hi = pos.ceil() as usize;
  let frac = pos - lo as f64;
  Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

impl LatencyStats {
  /// Count, mean, p50/p90 and fraction at or below `sla_threshold_minutes`.
  pub fn from_latencies(latencies: &[f64], sla_threshold_minutes: f64) -> Result<Self, EngineError> {
    if latencies.is_empty() {
      return Err(EngineError::EmptyBucket);
    }
    let mut sorted = latencies.to_vec();
    sorted.sort_by(f64::total_cmp);

    let count = sorted.len();
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let within = sorted.iter().filter(|&&l| l <= sla_threshold_minutes).count();

    Ok(Self {
      count,
      p50: percentile(&sorted, 50.0)?,
      p90: percentile(&sorted, 90.0)?,
      mean,
      sla_fraction: within as f64 / count as f64,
    })
  }
}

fn check_threshold(sla_threshold_minutes: f64) -> Result<(), EngineError> {
  if !sla_threshold_minutes.is_finite() || sla_threshold_minutes < 0.0 {
    return Err(EngineError::validation(
      "sla_threshold_minutes",
      "must be a non-negative number",
    ));
  }
  Ok(())
}

/// Group results that carry a latency by `bucket_key` and compute statistics
/// per bucket. Buckets come back sorted by key; empty ones are never emitted.
pub fn aggregate<F>(
  results: &[CorrelationResult],
  bucket_key: F,
  sla_threshold_minutes: f64,
) -> Result<Vec<StatBucket>, EngineError>
where
  F: Fn(&CorrelationResult) -> Option<String>,
{
  check_threshold(sla_threshold_minutes)?;

  let mut by_period: BTreeMap<String, Vec<f64>> = BTreeMap::new();
  for result in results {
    let Some(latency) = result.latency_minutes else {
      continue;
    };
    if let Some(key) = bucket_key(result) {
      by_period.entry(key).or_default().push(latency);
    }
  }

  by_period
    .into_iter()
    .map(|(period, latencies)| {
      Ok(StatBucket {
        period,
        stats: LatencyStats::from_latencies(&latencies, sla_threshold_minutes)?,
      })
    })
    .collect()
}

/// Statistics for results whose reference time is at or after `since`.
/// `None` when nothing qualifies.
pub fn summarize_since(
  results: &[CorrelationResult],
  since: DateTime<Utc>,
  reference: BucketReference,
  sla_threshold_minutes: f64,
) -> Result<Option<PeriodSummary>, EngineError> {
  check_threshold(sla_threshold_minutes)?;

  let latencies: Vec<f64> = results
    .iter()
    .filter(|r| reference.timestamp(r).is_some_and(|ts| ts >= since))
    .filter_map(|r| r.latency_minutes)
    .collect();
  if latencies.is_empty() {
    return Ok(None);
  }

  let stats = LatencyStats::from_latencies(&latencies, sla_threshold_minutes)?;
  let out_of_sla = latencies.iter().filter(|&&l| l > sla_threshold_minutes).count();
  Ok(Some(PeriodSummary {
    since,
    stats,
    out_of_sla,
  }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Event, EventKind, PullRequest, PullRequestId};
  use chrono::{Duration, TimeZone};

  fn result(n: u64, merged: DateTime<Utc>, latency: Option<f64>) -> CorrelationResult {
    let pull_request = PullRequest {
      id: PullRequestId(n),
      merge_commit: format!("sha{}", n),
      merged_at: merged,
      tag: Some(format!("merge_pr_{}", n)),
      authored_at: None,
    };
    let event = latency.map(|mins| Event {
      kind: EventKind::Import,
      channel: None,
      commit: format!("sha{}", n),
      timestamp: merged + Duration::seconds((mins * 60.0) as i64),
      reference: None,
    });
    CorrelationResult {
      pull_request,
      event,
      latency_minutes: latency,
    }
  }

  fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
  }

  #[test]
  fn bucket_key_formats() {
    let t = Utc.with_ymd_and_hms(2021, 1, 3, 14, 5, 30).unwrap();
    assert_eq!(month_bucket(&t), "2021-01");
    // Jan 3rd 2021 is a Sunday, still in ISO week 53 of 2020.
    assert_eq!(week_bucket(&t), "2020-W53");
    let t = Utc.with_ymd_and_hms(2021, 3, 8, 0, 0, 0).unwrap();
    assert_eq!(week_bucket(&t), "2021-W10");
  }

  #[test]
  fn linear_interpolated_percentiles() {
    let stats = LatencyStats::from_latencies(&[40.0, 10.0, 30.0, 20.0], 25.0).unwrap();
    assert_eq!(stats.count, 4);
    assert!(approx(stats.p50, 25.0));
    assert!(approx(stats.p90, 37.0));
    assert!(approx(stats.mean, 25.0));
    assert!(approx(stats.sla_fraction, 0.5));
  }

  #[test]
  fn single_value_bucket() {
    let stats = LatencyStats::from_latencies(&[42.5], 10.0).unwrap();
    assert_eq!(stats.p50, 42.5);
    assert_eq!(stats.p90, 42.5);
    assert_eq!(stats.mean, 42.5);
    assert_eq!(stats.sla_fraction, 0.0);
  }

  #[test]
  fn empty_set_is_an_error() {
    assert!(matches!(
      LatencyStats::from_latencies(&[], 10.0),
      Err(EngineError::EmptyBucket)
    ));
    assert!(matches!(percentile(&[], 50.0), Err(EngineError::EmptyBucket)));
  }

  #[test]
  fn sla_boundary_is_inclusive() {
    let stats = LatencyStats::from_latencies(&[60.0, 61.0], 60.0).unwrap();
    assert!(approx(stats.sla_fraction, 0.5));
  }

  #[test]
  fn aggregate_by_month_skips_missing_latencies() {
    let jan = Utc.with_ymd_and_hms(2018, 1, 10, 0, 0, 0).unwrap();
    let feb = Utc.with_ymd_and_hms(2018, 2, 10, 0, 0, 0).unwrap();
    let results = vec![
      result(1, jan, Some(10.0)),
      result(2, jan, Some(30.0)),
      result(3, feb, None),
      result(4, feb, Some(90.0)),
    ];
    let spec = BucketSpec {
      granularity: Granularity::Month,
      reference: BucketReference::PullRequestMerge,
    };
    let buckets = aggregate(&results, |r| spec.key(r), 60.0).unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].period, "2018-01");
    assert_eq!(buckets[0].stats.count, 2);
    assert!(approx(buckets[0].stats.mean, 20.0));
    assert_eq!(buckets[1].period, "2018-02");
    assert_eq!(buckets[1].stats.count, 1);
    assert!(approx(buckets[1].stats.sla_fraction, 0.0));
  }

  #[test]
  fn bucketing_by_event_time_moves_results() {
    // Merged at the end of January, imported in February.
    let merged = Utc.with_ymd_and_hms(2018, 1, 31, 23, 0, 0).unwrap();
    let results = vec![result(1, merged, Some(120.0))];
    let by_event = BucketSpec {
      granularity: Granularity::Month,
      reference: BucketReference::Event,
    };
    let by_merge = BucketSpec {
      reference: BucketReference::PullRequestMerge,
      ..by_event
    };
    assert_eq!(aggregate(&results, |r| by_event.key(r), 60.0).unwrap()[0].period, "2018-02");
    assert_eq!(aggregate(&results, |r| by_merge.key(r), 60.0).unwrap()[0].period, "2018-01");
  }

  #[test]
  fn no_latencies_means_no_buckets() {
    let t = Utc.with_ymd_and_hms(2018, 1, 10, 0, 0, 0).unwrap();
    let results = vec![result(1, t, None)];
    let buckets = aggregate(&results, |_| Some("x".into()), 60.0).unwrap();
    assert!(buckets.is_empty());
  }

  #[test]
  fn period_summary_filters_by_cutoff() {
    let before = Utc.with_ymd_and_hms(2017, 9, 20, 0, 0, 0).unwrap();
    let after = Utc.with_ymd_and_hms(2017, 10, 5, 0, 0, 0).unwrap();
    let quarter = Utc.with_ymd_and_hms(2017, 10, 1, 0, 0, 0).unwrap();
    let results = vec![
      result(1, before, Some(5.0)),
      result(2, after, Some(50.0)),
      result(3, after, Some(150.0)),
    ];
    let summary = summarize_since(&results, quarter, BucketReference::PullRequestMerge, 60.0)
      .unwrap()
      .unwrap();
    assert_eq!(summary.stats.count, 2);
    assert_eq!(summary.out_of_sla, 1);
    assert!(approx(summary.stats.sla_fraction, 0.5));

    let late = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
    assert!(summarize_since(&results, late, BucketReference::Event, 60.0)
      .unwrap()
      .is_none());
  }

  #[test]
  fn rejects_negative_threshold() {
    let err = aggregate(&[], |_| None, -1.0).unwrap_err();
    assert!(err.to_string().contains("sla_threshold_minutes"));
  }
}
