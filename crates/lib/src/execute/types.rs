//! Types for plan execution.
//!
//! This module defines the error types, result types, and configuration
//! for running a plan against a root filesystem.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::{PlanError, Step};

/// Errors raised by a [`StepExecutor`](super::StepExecutor).
#[derive(Debug, Error)]
pub enum StepError {
  /// Command exited unsuccessfully. `code` is `None` when killed by a signal.
  #[error("command failed with exit code {code:?}: {cmd}")]
  NonZeroExit { cmd: String, code: Option<i32> },

  /// Copy source does not exist in the build context.
  #[error("copy source not found: {0}")]
  SourceNotFound(String),

  /// Copy destination could not be created or written.
  #[error("cannot write {path}: {message}")]
  DestinationUnwritable { path: String, message: String },

  /// I/O error while spawning or waiting for a command.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Errors raised by an [`ArtifactFetcher`](super::ArtifactFetcher).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// Transport failure, timeout or server error.
  #[error("network error fetching {url}: {message}")]
  Network { url: String, message: String },

  /// The server reported that the artifact does not exist.
  #[error("artifact not found: {url}")]
  NotFound { url: String },

  /// The staging file could not be created, written or removed.
  #[error("cannot write {path}: {message}")]
  Write { path: String, message: String },

  /// Downloaded content does not match the declared SHA-256.
  #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    url: String,
    expected: String,
    actual: String,
  },
}

impl FetchError {
  /// Returns true if retrying the same request may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, FetchError::Network { .. })
  }
}

/// Cause of a failed run.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error(transparent)]
  Step(#[from] StepError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  /// The plan violates a structural invariant; nothing was executed.
  #[error("invalid plan: {0}")]
  InvalidPlan(#[from] PlanError),
}

/// A filesystem-changing step together with the directory it ran in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
  /// Working directory of the enclosing scope.
  pub workdir: String,
  /// The executed `RunCommand` or `CopyFile` step, with a resolved
  /// destination for copies.
  pub step: Step,
}

/// Image specification accumulated while a plan runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
  /// Base image reference.
  pub from: String,
  /// Executed filesystem steps in order.
  pub layers: Vec<Layer>,
  pub entrypoint: Vec<String>,
  pub cmd: Vec<String>,
  /// Image environment; later `SetEnv` steps overwrite earlier ones.
  pub env: BTreeMap<String, String>,
}

/// Outcome of running a plan.
#[derive(Debug)]
pub enum ExecutionResult {
  /// Every step succeeded.
  Succeeded(ImageSpec),
  /// The step at `index` failed; no later step was executed.
  Failed {
    index: usize,
    step: Step,
    cause: ExecuteError,
  },
}

impl ExecutionResult {
  /// Returns true if every step succeeded.
  pub fn is_success(&self) -> bool {
    matches!(self, ExecutionResult::Succeeded(_))
  }

  /// The finished image, if the run succeeded.
  pub fn image(&self) -> Option<&ImageSpec> {
    match self {
      ExecutionResult::Succeeded(image) => Some(image),
      ExecutionResult::Failed { .. } => None,
    }
  }
}

/// Configuration for running steps on the host.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Host directory holding the image root filesystem. Container paths such
  /// as `/usr/local/bin` are mapped beneath it.
  pub root: PathBuf,

  /// Build context directory that `CopyFile` sources are relative to.
  pub context: PathBuf,

  /// Command prefix used to run shell commands, e.g.
  /// `["chroot", "/srv/root", "/bin/sh", "-c"]`. The command text is
  /// appended as the final argument, prefixed with `cd <workdir> &&`, so the
  /// wrapper must change root into the image for `workdir` to resolve.
  /// If None, uses `/bin/sh -c` with the mapped host directory as cwd.
  pub shell: Option<Vec<String>>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      root: PathBuf::from("."),
      context: PathBuf::from("."),
      shell: None,
    }
  }
}

/// Configuration for the HTTP artifact fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
  /// Host directory that staging paths are mapped beneath.
  pub root: PathBuf,

  /// Per-request timeout.
  pub timeout: Duration,

  /// Additional attempts after a retryable failure.
  pub retries: u32,

  /// Fixed delay between attempts.
  pub retry_delay: Duration,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      root: PathBuf::from("."),
      timeout: Duration::from_secs(30),
      retries: 2,
      retry_delay: Duration::from_secs(1),
    }
  }
}
