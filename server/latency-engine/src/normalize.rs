//! Normalize inbound records into canonical pull requests and events.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use chrono::{DateTime, Utc};

use crate::ancestry::pr_number_from_tag;
use crate::error::EngineError;
use crate::types::*;

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, EngineError> {
  Ok(
    DateTime::parse_from_rfc3339(raw.trim())
      .map_err(|e| EngineError::validation(field, &format!("invalid RFC3339: {}", e)))?
      .with_timezone(&Utc),
  )
}

/// Commit references must be non-empty and must not look like options.
fn parse_commit(field: &str, raw: &str) -> Result<String, EngineError> {
  let commit = raw.trim();
  if commit.is_empty() {
    return Err(EngineError::validation(field, "must not be empty"));
  }
  if commit.starts_with('-') {
    return Err(EngineError::validation(field, "must not start with '-'"));
  }
  Ok(commit.to_string())
}

/// Parse and validate an InboundPullRequest.
///
/// The PR number comes from `number`, or from the tag name when absent; when
/// both are present they must agree.
pub fn normalize_pull_request(
  raw: &InboundPullRequest,
  tag_prefix: &str,
) -> Result<PullRequest, EngineError> {
  let merged_at = parse_timestamp("merged_at", &raw.merged_at)?;

  let merge_commit = parse_commit("merge_commit_sha", &raw.merge_commit_sha)?;

  let tag = raw
    .tag
    .as_deref()
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .map(str::to_string);

  let from_tag = match &tag {
    Some(t) => Some(pr_number_from_tag(t, tag_prefix).ok_or_else(|| {
      EngineError::validation("tag", &format!("expected {}<number>, got {}", tag_prefix, t))
    })?),
    None => None,
  };

  let id = match (raw.number.map(PullRequestId), from_tag) {
    (Some(n), Some(t)) if n != t => {
      return Err(EngineError::validation(
        "number",
        &format!("{} disagrees with tag {}", n, t),
      ));
    }
    (Some(n), _) => n,
    (None, Some(t)) => t,
    (None, None) => {
      return Err(EngineError::validation(
        "number",
        "missing and not derivable from tag",
      ));
    }
  };

  let authored_at = match &raw.authored_at {
    Some(a) => Some(parse_timestamp("authored_at", a)?),
    None => None,
  };

  Ok(PullRequest {
    id,
    merge_commit,
    merged_at,
    tag,
    authored_at,
  })
}

/// Parse and validate an InboundEvent.
pub fn normalize_event(raw: &InboundEvent) -> Result<Event, EngineError> {
  let kind = EventKind::from_str_loose(&raw.kind)
    .ok_or_else(|| EngineError::validation("kind", "expected import|export|run"))?;
  let timestamp = parse_timestamp("timestamp", &raw.timestamp)?;

  let commit = parse_commit("commit", &raw.commit)?;

  let clean = |s: &Option<String>| {
    s.as_deref()
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .map(str::to_string)
  };

  Ok(Event {
    kind,
    channel: clean(&raw.channel).map(|c| c.to_ascii_lowercase()),
    commit,
    timestamp,
    reference: clean(&raw.reference),
  })
}

/// Reject pull request sets where two PRs share a merge commit or an id.
pub fn check_unique(pull_requests: &[PullRequest]) -> Result<(), EngineError> {
  let mut commits: HashSet<&str> = HashSet::with_capacity(pull_requests.len());
  let mut ids: HashSet<PullRequestId> = HashSet::with_capacity(pull_requests.len());
  for pr in pull_requests {
    if !commits.insert(pr.merge_commit.as_str()) {
      return Err(EngineError::validation(
        "merge_commit_sha",
        &format!("{} is shared by more than one PR", pr.merge_commit),
      ));
    }
    if !ids.insert(pr.id) {
      return Err(EngineError::validation("number", &format!("duplicate PR {}", pr.id)));
    }
  }
  Ok(())
}

/// Collapse events with the same (kind, channel, commit) to the earliest one.
/// Ties keep the first in input order; survivors keep their relative order.
/// Returns the survivors and how many duplicates were dropped.
pub fn dedupe_events(events: Vec<Event>) -> (Vec<Event>, usize) {
  let mut keep: HashMap<(EventKind, Option<&str>, &str), usize> = HashMap::new();
  for (idx, event) in events.iter().enumerate() {
    keep
      .entry(event.identity())
      .and_modify(|best| {
        if event.timestamp < events[*best].timestamp {
          *best = idx;
        }
      })
      .or_insert(idx);
  }
  let survivors: HashSet<usize> = keep.into_values().collect();

  let total = events.len();
  let kept: Vec<Event> = events
    .into_iter()
    .enumerate()
    .filter(|(idx, _)| survivors.contains(idx))
    .map(|(_, e)| e)
    .collect();
  let dropped = total - kept.len();
  (kept, dropped)
}

/// Pull requests merged at or after `cutoff`.
pub fn apply_cutoff(pull_requests: Vec<PullRequest>, cutoff: Option<DateTime<Utc>>) -> Vec<PullRequest> {
  match cutoff {
    Some(c) => pull_requests.into_iter().filter(|pr| pr.merged_at >= c).collect(),
    None => pull_requests,
  }
}

/// Everything read from one JSON lines stream.
#[derive(Debug, Default)]
pub struct Ingested {
  pub pull_requests: Vec<PullRequest>,
  pub events: Vec<Event>,
  /// Lines that failed to parse or validate.
  pub rejected: usize,
}

/// Read JSON lines of [`InboundRecord`]. Invalid lines are logged and
/// counted; read errors abort.
pub fn read_records<R: BufRead>(reader: R, tag_prefix: &str) -> Result<Ingested, EngineError> {
  let mut out = Ingested::default();

  for (lineno, line) in reader.lines().enumerate() {
    let line = line?;
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let record: InboundRecord = match serde_json::from_str(trimmed) {
      Ok(r) => r,
      Err(e) => {
        tracing::warn!(line = lineno + 1, error = %e, "json parse failed; line skipped");
        out.rejected += 1;
        continue;
      }
    };

    let normalized = match &record {
      InboundRecord::PullRequest(raw) => {
        normalize_pull_request(raw, tag_prefix).map(|pr| out.pull_requests.push(pr))
      }
      InboundRecord::Event(raw) => normalize_event(raw).map(|e| out.events.push(e)),
    };
    if let Err(e) = normalized {
      tracing::warn!(line = lineno + 1, error = %e, "invalid record; line skipped");
      out.rejected += 1;
    }
  }

  check_unique(&out.pull_requests)?;
  Ok(out)
}
