use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::placeholder::PlaceholderError;
use crate::util::hash::Hashable;

/// A single instruction of a flattened plan.
///
/// Steps carry fully substituted arguments. Scope steps carry absolute
/// working directories; relative `CopyFile` destinations are resolved against
/// the enclosing scope when the step runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
  /// Run a shell command in the current working directory.
  RunCommand { cmd: String },
  /// Copy `src` (relative to the build context) to `dst`.
  CopyFile { src: String, dst: String },
  /// Set an image environment variable.
  SetEnv { key: String, value: String },
  /// Overwrite the image entrypoint and default command.
  SetExec { entrypoint: Vec<String>, cmd: Vec<String> },
  /// Push `path` as the working directory.
  EnterScope { path: String },
  /// Restore the previous working directory.
  ExitScope,
  /// Stage the artifact at `url` to `path`.
  Fetch {
    url: String,
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
  },
  /// Remove the staged artifact at `path`.
  Release { path: String },
}

impl fmt::Display for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Step::RunCommand { cmd } => write!(f, "run {}", cmd),
      Step::CopyFile { src, dst } => write!(f, "copy {} -> {}", src, dst),
      Step::SetEnv { key, value } => write!(f, "env {}={}", key, value),
      Step::SetExec { entrypoint, cmd } => write!(f, "set_exec {:?} {:?}", entrypoint, cmd),
      Step::EnterScope { path } => write!(f, "enter {}", path),
      Step::ExitScope => write!(f, "exit"),
      Step::Fetch { url, path, .. } => write!(f, "fetch {} -> {}", url, path),
      Step::Release { path } => write!(f, "release {}", path),
    }
  }
}

/// The flattened, variable-resolved sequence of steps built from a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
  /// Resolved base image reference.
  pub from: String,
  /// Steps in execution order.
  pub steps: Vec<Step>,
}

impl Hashable for Plan {}

impl Plan {
  /// Parse a plan from its JSON form.
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Check the structural invariants a runner relies on.
  ///
  /// - every `EnterScope` has a matching `ExitScope` and no `ExitScope`
  ///   appears at the root
  /// - every `Fetch` is released exactly once within the same scope
  /// - no artifact path is fetched again while still staged
  pub fn validate(&self) -> Result<(), PlanError> {
    // One entry per open scope: artifacts staged at that depth.
    let mut frames: Vec<Vec<(usize, &str)>> = vec![Vec::new()];

    for (index, step) in self.steps.iter().enumerate() {
      match step {
        Step::EnterScope { .. } => frames.push(Vec::new()),
        Step::ExitScope => {
          if frames.len() == 1 {
            return Err(PlanError::UnbalancedExit { index });
          }
          if let Some(staged) = frames.pop()
            && let Some((fetched_at, path)) = staged.first()
          {
            return Err(PlanError::UnreleasedArtifact {
              index: *fetched_at,
              path: path.to_string(),
            });
          }
        }
        Step::Fetch { path, .. } => {
          if frames.iter().flatten().any(|(_, staged)| staged == path) {
            return Err(PlanError::DuplicateArtifact {
              index,
              path: path.clone(),
            });
          }
          if let Some(current) = frames.last_mut() {
            current.push((index, path.as_str()));
          }
        }
        Step::Release { path } => {
          let current = frames.last_mut().ok_or(PlanError::UnbalancedExit { index })?;
          if let Some(pos) = current.iter().position(|(_, staged)| staged == path) {
            current.remove(pos);
          } else if frames.iter().flatten().any(|(_, staged)| staged == path) {
            return Err(PlanError::ReleaseOutsideScope {
              index,
              path: path.clone(),
            });
          } else {
            return Err(PlanError::ReleaseWithoutFetch {
              index,
              path: path.clone(),
            });
          }
        }
        _ => {}
      }
    }

    if frames.len() > 1 {
      return Err(PlanError::UnclosedScope { depth: frames.len() - 1 });
    }
    if let Some((index, path)) = frames.first().and_then(|root| root.first()) {
      return Err(PlanError::UnreleasedArtifact {
        index: *index,
        path: path.to_string(),
      });
    }
    Ok(())
  }
}

/// Options that influence how a recipe is flattened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
  /// Building from a cached or prebuilt artifact: `skip` blocks are omitted.
  pub from_cache: bool,
}

/// Errors raised while building a plan. No step has executed when one of
/// these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  #[error("recipe does not declare a base image")]
  MissingBaseImage,

  #[error("required variable '{0}' is not set in the build environment")]
  MissingVariable(String),

  /// `position` is the index the step would occupy in the plan; references
  /// in the base image report position 0.
  #[error("unresolved variable '{name}' in step {position}")]
  UnresolvedVariable { name: String, position: usize },

  #[error("invalid placeholder in step {position}: {source}")]
  Placeholder {
    position: usize,
    source: PlaceholderError,
  },
}

/// Structural problems found by [`Plan::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PlanError {
  #[error("step {index}: exit_scope without a matching enter_scope")]
  UnbalancedExit { index: usize },

  #[error("plan ends with {depth} scope(s) still open")]
  UnclosedScope { depth: usize },

  #[error("step {index}: release of {path} which was never fetched")]
  ReleaseWithoutFetch { index: usize, path: String },

  #[error("step {index}: release of {path} outside the scope it was fetched in")]
  ReleaseOutsideScope { index: usize, path: String },

  #[error("step {index}: artifact {path} is never released")]
  UnreleasedArtifact { index: usize, path: String },

  #[error("step {index}: artifact {path} is already staged")]
  DuplicateArtifact { index: usize, path: String },
}

impl PlanError {
  /// Index of the offending step, if the problem is tied to one.
  pub fn index(&self) -> Option<usize> {
    match self {
      PlanError::UnbalancedExit { index }
      | PlanError::ReleaseWithoutFetch { index, .. }
      | PlanError::ReleaseOutsideScope { index, .. }
      | PlanError::UnreleasedArtifact { index, .. }
      | PlanError::DuplicateArtifact { index, .. } => Some(*index),
      PlanError::UnclosedScope { .. } => None,
    }
  }
}
