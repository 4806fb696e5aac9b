//! Correlate pull requests with the earliest event that incorporates them.
//!
//! Three passes: resolve every event onto a PR, keep the earliest event per
//! PR, then walk PRs in reverse merge order carrying the earliest event seen
//! so far. A later PR that was already picked up implies every earlier PR was
//! too.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::ancestry::{self, AncestryResolver};
use crate::config::Config;
use crate::error::EngineError;
use crate::types::{CorrelationResult, Event, LatencyAnchor, PullRequest, PullRequestId, TieBreak};

/// Results of one correlation pass plus what was dropped along the way.
#[derive(Debug, Clone, Default)]
pub struct Correlation {
  pub results: Vec<CorrelationResult>,
  pub resolved_events: usize,
  pub unresolvable_events: usize,
  pub unattributed_events: usize,
  pub negative_latencies: usize,
}

/// Earliest event resolved directly onto one PR.
#[derive(Debug, Clone, Copy)]
struct Candidate {
  event: usize,
  distance: Option<u32>,
}

pub struct Correlator<'r, 'a> {
  resolver: &'r AncestryResolver<'a>,
  anchor: LatencyAnchor,
  tie_break: TieBreak,
  verify_ordering: bool,
}

impl<'r, 'a> Correlator<'r, 'a> {
  pub fn new(resolver: &'r AncestryResolver<'a>, config: &Config) -> Self {
    Self {
      resolver,
      anchor: config.anchor,
      tie_break: config.tie_break,
      verify_ordering: config.must_verify_ordering(),
    }
  }

  pub fn with_anchor(mut self, anchor: LatencyAnchor) -> Self {
    self.anchor = anchor;
    self
  }

  pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
    self.tie_break = tie_break;
    self
  }

  /// One result per PR, in input order.
  pub fn correlate(
    &self,
    pull_requests: &[PullRequest],
    events: &[Event],
  ) -> Result<Vec<CorrelationResult>, EngineError> {
    self.run(pull_requests, events).map(|c| c.results)
  }

  /// Like [`Correlator::correlate`], keeping the drop counters.
  pub fn run(
    &self,
    pull_requests: &[PullRequest],
    events: &[Event],
  ) -> Result<Correlation, EngineError> {
    // Merge order; stable so equal timestamps keep input order.
    let mut order: Vec<usize> = (0..pull_requests.len()).collect();
    order.sort_by_key(|&i| pull_requests[i].merged_at);

    let already_verified = self.resolver.tag_index().is_some_and(|index| {
      index.covers(order.iter().map(|&i| pull_requests[i].merge_commit.as_str()))
    });
    if !already_verified && (self.verify_ordering || self.resolver.requires_verified_order()) {
      ancestry::verify_ordering(
        self.resolver.oracle(),
        order.iter().map(|&i| &pull_requests[i]),
      )?;
    }

    let mut rank: HashMap<PullRequestId, usize> = HashMap::with_capacity(order.len());
    for (r, &i) in order.iter().enumerate() {
      if rank.insert(pull_requests[i].id, r).is_some() {
        return Err(EngineError::validation(
          "pull_requests",
          &format!("duplicate PR {}", pull_requests[i].id),
        ));
      }
    }

    let mut out = Correlation::default();

    // Pass 1 + 2: resolve events, keep the earliest per PR.
    let mut earliest: Vec<Option<Candidate>> = vec![None; order.len()];
    for (idx, event) in events.iter().enumerate() {
      let resolution = match self.resolver.nearest_tagged_predecessor(&event.commit) {
        Ok(Some(resolution)) => resolution,
        Ok(None) => {
          tracing::debug!(commit = %event.commit, "event precedes every tagged PR; excluded");
          out.unattributed_events += 1;
          continue;
        }
        Err(EngineError::ReferenceNotFound { reference }) => {
          tracing::warn!(%reference, kind = ?event.kind, "event commit not in ancestry graph; skipped");
          out.unresolvable_events += 1;
          continue;
        }
        Err(EngineError::UnrecognizedTag { tag }) => {
          tracing::warn!(%tag, commit = %event.commit, "nearest tag names no PR; event skipped");
          out.unattributed_events += 1;
          continue;
        }
        Err(e) => return Err(e),
      };

      let Some(&r) = rank.get(&resolution.pr) else {
        tracing::debug!(
          commit = %event.commit,
          pr = %resolution.pr,
          "event resolves to a PR outside this run; excluded"
        );
        out.unattributed_events += 1;
        continue;
      };
      out.resolved_events += 1;

      let candidate = Candidate {
        event: idx,
        distance: resolution.distance,
      };
      earliest[r] = match earliest[r] {
        Some(current) if !self.replaces(events, candidate, current) => Some(current),
        _ => Some(candidate),
      };
    }

    // Pass 3: reverse merge order, carrying the earliest event so far.
    let mut attached: Vec<Option<usize>> = vec![None; order.len()];
    let mut running: Option<usize> = None;
    for r in (0..order.len()).rev() {
      if let Some(direct) = earliest[r] {
        running = match running {
          Some(seen) if events[seen].timestamp < events[direct.event].timestamp => Some(seen),
          _ => Some(direct.event),
        };
      }
      attached[r] = running;
    }

    let mut slot_of = vec![0; pull_requests.len()];
    for (r, &i) in order.iter().enumerate() {
      slot_of[i] = r;
    }

    let mut negative = 0;
    out.results = pull_requests
      .iter()
      .enumerate()
      .map(|(i, pr)| {
        let Some(event_idx) = attached[slot_of[i]] else {
          return CorrelationResult::unmatched(pr.clone());
        };
        let event = &events[event_idx];
        let Some(anchor) = self.anchor.timestamp(pr) else {
          tracing::debug!(pr = %pr.id, anchor = ?self.anchor, "PR lacks latency anchor");
          return CorrelationResult {
            pull_request: pr.clone(),
            event: Some(event.clone()),
            latency_minutes: None,
          };
        };
        let minutes = latency_minutes(anchor, event.timestamp);
        if minutes < 0.0 {
          let err = EngineError::NegativeLatency { pr: pr.id, minutes };
          tracing::warn!(commit = %event.commit, "{err}; result discarded");
          negative += 1;
          return CorrelationResult::unmatched(pr.clone());
        }
        CorrelationResult {
          pull_request: pr.clone(),
          event: Some(event.clone()),
          latency_minutes: Some(minutes),
        }
      })
      .collect();
    out.negative_latencies = negative;

    Ok(out)
  }

  /// Should `candidate` (later in input) replace `current` as the earliest?
  fn replaces(&self, events: &[Event], candidate: Candidate, current: Candidate) -> bool {
    let new_ts = events[candidate.event].timestamp;
    let cur_ts = events[current.event].timestamp;
    if new_ts != cur_ts {
      return new_ts < cur_ts;
    }
    match self.tie_break {
      TieBreak::InputOrder => false,
      TieBreak::ShortestDistance => {
        candidate.distance.unwrap_or(u32::MAX) < current.distance.unwrap_or(u32::MAX)
      }
    }
  }
}

/// Fractional minutes from `from` to `to`.
pub fn latency_minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
  (to - from).num_milliseconds() as f64 / 60_000.0
}
