//! Map arbitrary commits onto the pull request whose tag precedes them.
//!
//! Two resolution strategies share one interface: a single "describe nearest
//! tag" oracle call, or a binary search over a verified [`TagIndex`] using the
//! ancestor comparator.

use std::cmp::Ordering;

use crate::error::EngineError;
use crate::types::{PullRequest, PullRequestId};

/// Nearest tag found by the oracle, with the commit distance when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch {
  pub tag: String,
  pub distance: Option<u32>,
}

/// Capability interface over the commit graph.
///
/// Both methods fail with [`EngineError::ReferenceNotFound`] when a commit is
/// unknown to the graph.
pub trait AncestryOracle {
  /// Is `ancestor` an ancestor of (or equal to) `descendant`?
  fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, EngineError>;

  /// Nearest tag whose name starts with `prefix`, reachable from `commit`
  /// (`commit` itself included). Tags without the prefix are walked past.
  fn nearest_tag(&self, commit: &str, prefix: &str) -> Result<Option<TagMatch>, EngineError>;
}

/// Ternary ancestor comparator: `Less` when `a` is a strict ancestor of `b`,
/// `Equal` when they are the same commit, `Greater` otherwise (descendant or
/// unrelated).
pub fn compare_commits(
  oracle: &dyn AncestryOracle,
  a: &str,
  b: &str,
) -> Result<Ordering, EngineError> {
  if a == b {
    return Ok(Ordering::Equal);
  }
  if oracle.is_ancestor(a, b)? {
    Ok(Ordering::Less)
  } else {
    Ok(Ordering::Greater)
  }
}

/// Parse `merge_pr_123` (with `prefix = "merge_pr_"`) into PR 123.
pub fn pr_number_from_tag(tag: &str, prefix: &str) -> Option<PullRequestId> {
  let digits = tag.strip_prefix(prefix)?;
  if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  digits.parse().ok().map(PullRequestId)
}

/// Check that merge-date order matches ancestry order: each PR's merge commit
/// must be an ancestor of the next one's. `prs` must already be sorted by
/// merge time.
pub fn verify_ordering<'p, I>(oracle: &dyn AncestryOracle, prs: I) -> Result<(), EngineError>
where
  I: IntoIterator<Item = &'p PullRequest>,
{
  let mut previous: Option<&PullRequest> = None;
  for pr in prs {
    if let Some(prev) = previous {
      if !oracle.is_ancestor(&prev.merge_commit, &pr.merge_commit)? {
        tracing::error!(
          earlier = %prev.id,
          earlier_merged_at = %prev.merged_at,
          later = %pr.id,
          later_merged_at = %pr.merged_at,
          "merge dates disagree with commit graph order"
        );
        return Err(EngineError::OrderingViolation {
          earlier: prev.id,
          later: pr.id,
        });
      }
    }
    previous = Some(pr);
  }
  Ok(())
}

// ---------------------------------------------------------------------------
// Tag index (explicit per-run context)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
  pub pr: PullRequestId,
  pub tag: String,
  pub commit: String,
}

/// Tagged landing commits sorted by merge date, verified to also be in
/// ancestry order. Owned by the caller; invalidate it when the graph changes.
#[derive(Debug, Clone)]
pub struct TagIndex {
  entries: Vec<TagEntry>,
  valid: bool,
}

impl TagIndex {
  /// Build from the tagged PRs in `prs` and verify their ordering.
  pub fn build(prs: &[PullRequest], oracle: &dyn AncestryOracle) -> Result<Self, EngineError> {
    let mut tagged: Vec<&PullRequest> = prs.iter().filter(|pr| pr.is_tagged()).collect();
    tagged.sort_by_key(|pr| pr.merged_at);
    verify_ordering(oracle, tagged.iter().copied())?;

    let entries = tagged
      .into_iter()
      .filter_map(|pr| {
        pr.tag.as_ref().map(|tag| TagEntry {
          pr: pr.id,
          tag: tag.clone(),
          commit: pr.merge_commit.clone(),
        })
      })
      .collect();

    Ok(Self {
      entries,
      valid: true,
    })
  }

  pub fn entries(&self) -> &[TagEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn is_valid(&self) -> bool {
    self.valid
  }

  /// True when `commits`, in merge order, are exactly the verified entries.
  pub fn covers<'c, I>(&self, commits: I) -> bool
  where
    I: IntoIterator<Item = &'c str>,
  {
    if !self.valid {
      return false;
    }
    let mut entries = self.entries.iter();
    for commit in commits {
      match entries.next() {
        Some(entry) if entry.commit == commit => {}
        _ => return false,
      }
    }
    entries.next().is_none()
  }

  /// Drop the cached entries; lookups fail until the index is rebuilt.
  pub fn invalidate(&mut self) {
    self.entries.clear();
    self.valid = false;
  }

  /// Latest entry whose commit is an ancestor of (or equal to) `commit`.
  ///
  /// O(log n) oracle calls. Relies on the ordering verified by `build`.
  pub fn search(
    &self,
    oracle: &dyn AncestryOracle,
    commit: &str,
  ) -> Result<Option<&TagEntry>, EngineError> {
    if !self.valid {
      return Err(EngineError::StaleTagIndex);
    }
    let Some(first) = self.entries.first() else {
      return Ok(None);
    };
    if compare_commits(oracle, &first.commit, commit)? == Ordering::Greater {
      // Older than the oldest tag, or on a side branch.
      return Ok(None);
    }

    // Invariant: entries[lo] precedes-or-equals `commit`.
    let mut lo = 0;
    let mut hi = self.entries.len() - 1;
    while lo < hi {
      let mid = (lo + hi + 1) / 2;
      if compare_commits(oracle, &self.entries[mid].commit, commit)? == Ordering::Greater {
        hi = mid - 1;
      } else {
        lo = mid;
      }
    }
    Ok(Some(&self.entries[lo]))
  }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// A commit resolved onto the PR whose tag is its nearest predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
  pub pr: PullRequestId,
  /// Commits between the tag and the resolved commit, when the strategy knows.
  pub distance: Option<u32>,
}

pub enum AncestryResolver<'a> {
  Describe {
    oracle: &'a dyn AncestryOracle,
    tag_prefix: String,
  },
  BinarySearch {
    oracle: &'a dyn AncestryOracle,
    index: &'a TagIndex,
  },
}

impl<'a> AncestryResolver<'a> {
  pub fn describe(oracle: &'a dyn AncestryOracle, tag_prefix: impl Into<String>) -> Self {
    Self::Describe {
      oracle,
      tag_prefix: tag_prefix.into(),
    }
  }

  pub fn binary_search(oracle: &'a dyn AncestryOracle, index: &'a TagIndex) -> Self {
    Self::BinarySearch { oracle, index }
  }

  pub fn oracle(&self) -> &'a dyn AncestryOracle {
    match self {
      Self::Describe { oracle, .. } | Self::BinarySearch { oracle, .. } => *oracle,
    }
  }

  /// The verified index behind a binary-search resolver.
  pub fn tag_index(&self) -> Option<&'a TagIndex> {
    match self {
      Self::Describe { .. } => None,
      Self::BinarySearch { index, .. } => Some(*index),
    }
  }

  /// Whether correctness depends on merge order matching ancestry order.
  pub fn requires_verified_order(&self) -> bool {
    matches!(self, Self::BinarySearch { .. })
  }

  /// PR of the nearest tag that is an ancestor-or-equal of `commit`.
  pub fn nearest_tagged_predecessor(&self, commit: &str) -> Result<Option<Resolution>, EngineError> {
    match self {
      Self::Describe { oracle, tag_prefix } => {
        let Some(found) = oracle.nearest_tag(commit, tag_prefix)? else {
          return Ok(None);
        };
        let pr = pr_number_from_tag(&found.tag, tag_prefix)
          .ok_or_else(|| EngineError::UnrecognizedTag { tag: found.tag.clone() })?;
        Ok(Some(Resolution {
          pr,
          distance: found.distance,
        }))
      }
      Self::BinarySearch { oracle, index } => Ok(index.search(*oracle, commit)?.map(|entry| {
        Resolution {
          pr: entry.pr,
          distance: None,
        }
      })),
    }
  }
}
