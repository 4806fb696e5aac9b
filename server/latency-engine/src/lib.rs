//! Latency engine: deterministic PR -> event correlation (batch).
//!
//! Resolves event commits onto `merge_pr_*` tagged pull requests through
//! commit ancestry, attaches the earliest incorporating event to every PR,
//! and aggregates latencies into calendar buckets with SLA compliance.
//!
//! Single-threaded; the only external calls go through [`AncestryOracle`].

pub mod ancestry;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod git;
pub mod memory;
pub mod normalize;
pub mod sink;
pub mod stats;
pub mod types;

pub use ancestry::{AncestryOracle, AncestryResolver, TagIndex};
pub use config::{Config, Strategy};
pub use correlation::Correlator;
pub use engine::{Engine, PullRequestSource};
pub use error::EngineError;
pub use git::GitOracle;
pub use memory::MemoryGraph;
pub use sink::{CsvSink, ResultSink};
pub use stats::aggregate;
pub use types::{CorrelationResult, Event, PullRequest, PullRequestId, Report, StatBucket};
