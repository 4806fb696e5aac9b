//! Binary entrypoint: read JSON lines from stdin, write bucket CSV to stdout.
//!
//! Each input line is a pull request or an event record. The ancestry graph is
//! the git repository at `LATENCY_REPO_DIR` (default: current directory).
//! Raw latency records go to `LATENCY_RECORDS_CSV` and a JSON run summary to
//! `LATENCY_SUMMARY_JSON` when set. Logs go to
//! stderr, filtered by `RUST_LOG` (default `info`).

use std::fs::File;
use std::io::{self, BufWriter};

use latency_engine::{normalize, sink};
use latency_engine::{Config, CsvSink, Engine, GitOracle, ResultSink};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let config = Config::from_env()?;
  let repo_dir = std::env::var("LATENCY_REPO_DIR").unwrap_or_else(|_| ".".into());
  let records_path = std::env::var("LATENCY_RECORDS_CSV").ok();
  let summary_path = std::env::var("LATENCY_SUMMARY_JSON").ok();

  let oracle = GitOracle::new(repo_dir);

  let ingested = normalize::read_records(io::stdin().lock(), &config.tag_prefix)?;
  if ingested.rejected > 0 {
    tracing::warn!(rejected = ingested.rejected, "some input lines were skipped");
  }

  let engine = Engine::new(config);
  let report = engine.analyze_source(&ingested.pull_requests, &oracle, ingested.events)?;

  if let Some(period) = &report.period {
    tracing::info!(
      since = %period.since,
      count = period.stats.count,
      p50 = period.stats.p50,
      p90 = period.stats.p90,
      mean = period.stats.mean,
      out_of_sla = period.out_of_sla,
      sla_fraction = period.stats.sla_fraction,
      "current period"
    );
  }

  // Only a completed run reaches the sink.
  let latencies = match records_path {
    Some(path) => Some(BufWriter::new(File::create(path)?)),
    None => None,
  };
  let mut sink = CsvSink::new(BufWriter::new(io::stdout().lock()), latencies);
  sink.persist(&report)?;

  if let Some(path) = summary_path {
    sink::write_summary(BufWriter::new(File::create(path)?), &report)?;
  }

  Ok(())
}
