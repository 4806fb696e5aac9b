//! Tabular output: bucket statistics and raw latency records as CSV.

use std::io::Write;

use serde::Serialize;

use crate::error::EngineError;
use crate::types::{Coverage, CorrelationResult, PeriodSummary, Report, StatBucket};

pub const BUCKET_HEADER: [&str; 6] = ["period", "count", "p50", "p90", "mean", "sla_fraction"];
pub const LATENCY_HEADER: [&str; 4] = ["pr", "event_reference", "event_time", "latency_minutes"];

#[derive(Serialize)]
struct BucketRow<'a> {
  period: &'a str,
  count: usize,
  p50: f64,
  p90: f64,
  mean: f64,
  sla_fraction: f64,
}

#[derive(Serialize)]
struct LatencyRow<'a> {
  pr: u64,
  event_reference: &'a str,
  event_time: String,
  latency_minutes: Option<f64>,
}

fn headerless<W: Write>(writer: W) -> csv::Writer<W> {
  csv::WriterBuilder::new().has_headers(false).from_writer(writer)
}

/// One row per bucket. The header is written even when there are no rows.
pub fn write_buckets<W: Write>(writer: W, buckets: &[StatBucket]) -> Result<(), EngineError> {
  let mut wtr = headerless(writer);
  wtr.write_record(BUCKET_HEADER)?;
  for bucket in buckets {
    wtr.serialize(BucketRow {
      period: &bucket.period,
      count: bucket.stats.count,
      p50: bucket.stats.p50,
      p90: bucket.stats.p90,
      mean: bucket.stats.mean,
      sla_fraction: bucket.stats.sla_fraction,
    })?;
  }
  wtr.flush()?;
  Ok(())
}

/// One row per result that found an event. Returns the number of rows.
pub fn write_latencies<W: Write>(
  writer: W,
  results: &[CorrelationResult],
) -> Result<usize, EngineError> {
  let mut wtr = headerless(writer);
  wtr.write_record(LATENCY_HEADER)?;
  let mut rows = 0;
  for result in results {
    let Some(event) = &result.event else {
      continue;
    };
    wtr.serialize(LatencyRow {
      pr: result.pull_request.id.0,
      event_reference: event.display_reference(),
      event_time: event.timestamp.to_rfc3339(),
      latency_minutes: result.latency_minutes,
    })?;
    rows += 1;
  }
  wtr.flush()?;
  Ok(rows)
}

#[derive(Serialize)]
struct Summary<'a> {
  run_id: &'a str,
  coverage: &'a Coverage,
  period: Option<&'a PeriodSummary>,
  buckets: &'a [StatBucket],
}

/// Run summary as one JSON document: run id, coverage, period and buckets.
pub fn write_summary<W: Write>(mut writer: W, report: &Report) -> Result<(), EngineError> {
  let summary = Summary {
    run_id: &report.run_id,
    coverage: &report.coverage,
    period: report.period.as_ref(),
    buckets: &report.buckets,
  };
  serde_json::to_writer_pretty(&mut writer, &summary)?;
  writer.write_all(b"\n")?;
  writer.flush()?;
  Ok(())
}

/// Persists the output of a completed run.
pub trait ResultSink {
  fn persist(&mut self, report: &Report) -> Result<(), EngineError>;
}

/// Writes bucket statistics and, optionally, latency records as CSV.
pub struct CsvSink<B: Write, L: Write> {
  buckets: B,
  latencies: Option<L>,
}

impl<B: Write, L: Write> CsvSink<B, L> {
  pub fn new(buckets: B, latencies: Option<L>) -> Self {
    Self { buckets, latencies }
  }

  pub fn into_inner(self) -> (B, Option<L>) {
    (self.buckets, self.latencies)
  }
}

impl<B: Write, L: Write> ResultSink for CsvSink<B, L> {
  fn persist(&mut self, report: &Report) -> Result<(), EngineError> {
    write_buckets(&mut self.buckets, &report.buckets)?;
    if let Some(out) = self.latencies.as_mut() {
      let rows = write_latencies(out, &report.results)?;
      tracing::debug!(rows, "latency records written");
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Event, EventKind, LatencyStats, PullRequest, PullRequestId};
  use chrono::{TimeZone, Utc};

  fn bucket(period: &str) -> StatBucket {
    StatBucket {
      period: period.into(),
      stats: LatencyStats {
        count: 4,
        p50: 25.0,
        p90: 37.0,
        mean: 25.0,
        sla_fraction: 0.5,
      },
    }
  }

  fn result(n: u64, with_event: bool) -> CorrelationResult {
    let t = Utc.with_ymd_and_hms(2018, 1, 2, 3, 4, 5).unwrap();
    CorrelationResult {
      pull_request: PullRequest {
        id: PullRequestId(n),
        merge_commit: format!("c{}", n),
        merged_at: t,
        tag: Some(format!("merge_pr_{}", n)),
        authored_at: None,
      },
      event: with_event.then(|| Event {
        kind: EventKind::Import,
        channel: None,
        commit: format!("c{}", n),
        timestamp: t,
        reference: Some("cr-abc".into()),
      }),
      latency_minutes: with_event.then_some(12.5),
    }
  }

  #[test]
  fn bucket_columns_in_order() {
    let mut out = Vec::new();
    write_buckets(&mut out, &[bucket("2018-01")]).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "period,count,p50,p90,mean,sla_fraction");
    assert_eq!(lines[1], "2018-01,4,25.0,37.0,25.0,0.5");
  }

  #[test]
  fn header_written_without_rows() {
    let mut out = Vec::new();
    write_buckets(&mut out, &[]).unwrap();
    assert_eq!(String::from_utf8(out).unwrap().trim(), BUCKET_HEADER.join(","));
  }

  #[test]
  fn latency_rows_only_for_matched_results() {
    let mut out = Vec::new();
    let rows = write_latencies(&mut out, &[result(1, true), result(2, false)]).unwrap();
    assert_eq!(rows, 1);
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "pr,event_reference,event_time,latency_minutes");
    assert_eq!(lines[1], "1,cr-abc,2018-01-02T03:04:05+00:00,12.5");
  }

  #[test]
  fn summary_is_json() {
    let report = Report {
      run_id: "run-test".into(),
      results: vec![result(1, true)],
      buckets: vec![bucket("2018-01")],
      period: None,
      coverage: Coverage {
        pull_requests: 1,
        ..Coverage::default()
      },
    };
    let mut out = Vec::new();
    write_summary(&mut out, &report).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(value["run_id"], "run-test");
    assert_eq!(value["coverage"]["pull_requests"], 1);
    assert!(value["period"].is_null());
    assert_eq!(value["buckets"][0]["period"], "2018-01");
    assert_eq!(value["buckets"][0]["p90"], 37.0);
  }

  #[test]
  fn csv_sink_persists_report() {
    let report = Report {
      run_id: "run-test".into(),
      results: vec![result(1, true)],
      buckets: vec![bucket("2018-01")],
      period: None,
      coverage: Coverage::default(),
    };
    let mut sink = CsvSink::new(Vec::new(), Some(Vec::new()));
    sink.persist(&report).unwrap();
    let (buckets, latencies) = sink.into_inner();
    assert_eq!(String::from_utf8(buckets).unwrap().lines().count(), 2);
    assert_eq!(String::from_utf8(latencies.unwrap()).unwrap().lines().count(), 2);
  }
}
