//! In-memory commit graph implementing [`AncestryOracle`].

use std::collections::{HashMap, HashSet, VecDeque};

use crate::ancestry::{AncestryOracle, TagMatch};
use crate::error::EngineError;

/// Commit graph held as an explicit parent map, with tags on commits.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
  parents: HashMap<String, Vec<String>>,
  tags: HashMap<String, String>,
}

impl MemoryGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Linear history: each commit's parent is the one before it.
  pub fn linear(commits: &[&str]) -> Self {
    let mut graph = Self::new();
    let mut previous: Option<&str> = None;
    for &commit in commits {
      graph = graph.with_commit(commit, previous.as_slice());
      previous = Some(commit);
    }
    graph
  }

  pub fn with_commit(mut self, commit: &str, parents: &[&str]) -> Self {
    self.add_commit(commit, parents);
    self
  }

  pub fn with_tag(mut self, commit: &str, tag: &str) -> Self {
    self.add_tag(commit, tag);
    self
  }

  pub fn add_commit(&mut self, commit: &str, parents: &[&str]) {
    self.parents.insert(
      commit.to_string(),
      parents.iter().map(|p| p.to_string()).collect(),
    );
  }

  pub fn add_tag(&mut self, commit: &str, tag: &str) {
    self.tags.insert(commit.to_string(), tag.to_string());
  }

  pub fn contains(&self, commit: &str) -> bool {
    self.parents.contains_key(commit)
  }

  fn require(&self, commit: &str) -> Result<&[String], EngineError> {
    self
      .parents
      .get(commit)
      .map(Vec::as_slice)
      .ok_or_else(|| EngineError::reference_not_found(commit))
  }

  /// Breadth-first walk over `start` and its ancestors with distances.
  fn walk<'g>(&'g self, start: &'g str) -> impl Iterator<Item = (&'g str, u32)> + 'g {
    let mut queue: VecDeque<(&str, u32)> = VecDeque::from([(start, 0)]);
    let mut seen: HashSet<&str> = HashSet::from([start]);
    std::iter::from_fn(move || {
      let (commit, distance) = queue.pop_front()?;
      for parent in self.parents.get(commit).into_iter().flatten() {
        if seen.insert(parent.as_str()) {
          queue.push_back((parent.as_str(), distance + 1));
        }
      }
      Some((commit, distance))
    })
  }
}

impl AncestryOracle for MemoryGraph {
  fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, EngineError> {
    self.require(ancestor)?;
    self.require(descendant)?;
    Ok(self.walk(descendant).any(|(commit, _)| commit == ancestor))
  }

  fn nearest_tag(&self, commit: &str, prefix: &str) -> Result<Option<TagMatch>, EngineError> {
    self.require(commit)?;
    Ok(self.walk(commit).find_map(|(c, distance)| {
      self.tags.get(c).filter(|tag| tag.starts_with(prefix)).map(|tag| TagMatch {
        tag: tag.clone(),
        distance: Some(distance),
      })
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn linear_ancestry() {
    let g = MemoryGraph::linear(&["a", "b", "c"]);
    assert!(g.is_ancestor("a", "c").unwrap());
    assert!(g.is_ancestor("b", "b").unwrap());
    assert!(!g.is_ancestor("c", "a").unwrap());
  }

  #[test]
  fn merge_commit_sees_both_parents() {
    // a - b ----- m
    //      \- x -/
    let g = MemoryGraph::new()
      .with_commit("a", &[])
      .with_commit("b", &["a"])
      .with_commit("x", &["b"])
      .with_commit("m", &["b", "x"])
      .with_tag("x", "merge_pr_2");
    assert!(g.is_ancestor("x", "m").unwrap());
    let found = g.nearest_tag("m", "merge_pr_").unwrap().unwrap();
    assert_eq!(found.tag, "merge_pr_2");
    assert_eq!(found.distance, Some(1));
  }

  #[test]
  fn unknown_commits_fail() {
    let g = MemoryGraph::linear(&["a"]);
    assert!(matches!(
      g.is_ancestor("a", "nope"),
      Err(EngineError::ReferenceNotFound { .. })
    ));
    assert!(matches!(
      g.nearest_tag("nope", "merge_pr_"),
      Err(EngineError::ReferenceNotFound { .. })
    ));
  }

  #[test]
  fn no_tag_reachable() {
    let g = MemoryGraph::linear(&["a", "b"]).with_tag("b", "merge_pr_1");
    assert_eq!(g.nearest_tag("a", "merge_pr_").unwrap(), None);
  }

  #[test]
  fn tags_outside_prefix_are_skipped() {
    let g = MemoryGraph::linear(&["a", "b", "c"])
      .with_tag("a", "merge_pr_1")
      .with_tag("b", "v2.0");
    let found = g.nearest_tag("c", "merge_pr_").unwrap().unwrap();
    assert_eq!(found.tag, "merge_pr_1");
    assert_eq!(found.distance, Some(2));
    assert_eq!(g.nearest_tag("c", "v").unwrap().unwrap().tag, "v2.0");
  }
}
