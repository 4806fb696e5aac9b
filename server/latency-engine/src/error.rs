//! Structured error types for the latency engine.

use thiserror::Error;

use crate::types::PullRequestId;

#[derive(Debug, Error)]
pub enum EngineError {
  /// Commit reference unknown to the ancestry graph. Recovered per event.
  #[error("reference not found: {reference}")]
  ReferenceNotFound { reference: String },

  /// Merge-date order and ancestry order disagree. Fatal to the run.
  #[error("ordering violation: PR {earlier} is merged before PR {later} but is not its ancestor")]
  OrderingViolation {
    earlier: PullRequestId,
    later: PullRequestId,
  },

  /// Nearest tag matches the prefix but carries no PR number. Recovered per event.
  #[error("unrecognized tag: {tag}")]
  UnrecognizedTag { tag: String },

  #[error("negative latency for PR {pr}: {minutes:.1} min")]
  NegativeLatency { pr: PullRequestId, minutes: f64 },

  #[error("statistics requested on an empty latency set")]
  EmptyBucket,

  #[error("tag index was invalidated; rebuild it before resolving")]
  StaleTagIndex,

  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("parse: {0}")]
  Parse(String),

  #[error("git: {0}")]
  Git(String),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("csv: {0}")]
  Csv(#[from] csv::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),
}

impl EngineError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn parse(msg: impl Into<String>) -> Self {
    Self::Parse(msg.into())
  }

  pub fn reference_not_found(reference: impl Into<String>) -> Self {
    Self::ReferenceNotFound {
      reference: reference.into(),
    }
  }
}
