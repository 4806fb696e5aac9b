//! [`AncestryOracle`] backed by the `git` executable.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::ancestry::{AncestryOracle, TagMatch};
use crate::error::EngineError;

/// Answers ancestry questions by shelling out to git in `repo_dir`.
#[derive(Debug, Clone)]
pub struct GitOracle {
  repo_dir: PathBuf,
}

impl GitOracle {
  pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
    Self {
      repo_dir: repo_dir.into(),
    }
  }

  pub fn repo_dir(&self) -> &Path {
    &self.repo_dir
  }

  /// Diagnostics are matched on text, so git runs with the C locale.
  fn command(&self, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(&self.repo_dir).env("LC_ALL", "C");
    cmd
  }

  fn run(&self, args: &[&str]) -> Result<Output, EngineError> {
    tracing::trace!(?args, "git");
    self
      .command(args)
      .output()
      .map_err(|e| EngineError::Git(format!("failed to run git: {e}")))
  }

  /// Does `commit` name a commit object in the repository?
  pub fn commit_exists(&self, commit: &str) -> Result<bool, EngineError> {
    check_ref(commit)?;
    let spec = format!("{commit}^{{commit}}");
    Ok(self.run(&["cat-file", "-e", &spec])?.status.success())
  }

  fn require(&self, commit: &str) -> Result<(), EngineError> {
    if self.commit_exists(commit)? {
      Ok(())
    } else {
      Err(EngineError::reference_not_found(commit))
    }
  }
}

/// Refs are passed positionally; one starting with `-` would be read as an
/// option.
fn check_ref(commit: &str) -> Result<(), EngineError> {
  if commit.is_empty() || commit.starts_with('-') {
    return Err(EngineError::reference_not_found(commit));
  }
  Ok(())
}

impl AncestryOracle for GitOracle {
  fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, EngineError> {
    check_ref(ancestor)?;
    check_ref(descendant)?;
    let output = self.run(&["merge-base", "--is-ancestor", ancestor, descendant])?;
    match output.status.code() {
      Some(0) => Ok(true),
      Some(1) => Ok(false),
      _ => {
        self.require(ancestor)?;
        self.require(descendant)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(EngineError::Git(format!(
          "git merge-base --is-ancestor failed: {}",
          stderr.trim()
        )))
      }
    }
  }

  fn nearest_tag(&self, commit: &str, prefix: &str) -> Result<Option<TagMatch>, EngineError> {
    self.require(commit)?;
    let pattern = format!("{prefix}*");
    let output = self.run(&["describe", "--tags", "--long", "--match", &pattern, commit])?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      if stderr.contains("No names found")
        || stderr.contains("No tags can describe")
        || stderr.contains("cannot describe")
      {
        return Ok(None);
      }
      return Err(EngineError::Git(format!(
        "git describe failed: {}",
        stderr.trim()
      )));
    }

    let described = String::from_utf8_lossy(&output.stdout).trim().to_string();
    parse_long_describe(&described)
      .map(Some)
      .ok_or_else(|| EngineError::parse(format!("unexpected git describe output: {described}")))
  }
}

/// Split `<tag>-<distance>-g<sha>` as printed by `git describe --long`.
fn parse_long_describe(s: &str) -> Option<TagMatch> {
  let mut parts = s.rsplitn(3, '-');
  let sha = parts.next()?;
  let distance = parts.next()?.parse().ok()?;
  let tag = parts.next()?;
  if !sha.starts_with('g') || tag.is_empty() {
    return None;
  }
  Some(TagMatch {
    tag: tag.to_string(),
    distance: Some(distance),
  })
}
