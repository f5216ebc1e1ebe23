//! Step execution collaborators.
//!
//! The runner drives two collaborators: a [`StepExecutor`] for commands and
//! copies, and an [`ArtifactFetcher`] for staged downloads. The host
//! implementations live in [`cmd`], [`copy`] and [`fetch`].

pub mod cmd;
pub mod copy;
pub mod fetch;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::execute::types::{FetchError, StepError};

pub use cmd::HostExecutor;
pub use fetch::HttpFetcher;

/// Runs filesystem-changing steps against an image root.
#[async_trait]
pub trait StepExecutor: Send + Sync {
  /// Run `cmd` through a shell with `workdir` as its working directory and
  /// exactly `env` as its environment.
  async fn run_command(&self, cmd: &str, workdir: &str, env: &BTreeMap<String, String>) -> Result<(), StepError>;

  /// Copy `src` from the build context to the absolute container path `dst`.
  /// A `dst` ending in `/` names a directory to copy into.
  async fn copy_file(&self, src: &str, dst: &str) -> Result<(), StepError>;
}

/// Stages remote artifacts into the image root.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
  /// Download `url` to the container path `path`, verifying `sha256` when
  /// given. Returns the host location of the staged file.
  async fn fetch(&self, url: &str, path: &str, sha256: Option<&str>) -> Result<PathBuf, FetchError>;

  /// Remove the staged artifact at `path`. Releasing an absent artifact
  /// succeeds.
  async fn release(&self, path: &str) -> Result<(), FetchError>;
}

/// Map an absolute container path onto the host directory `root`.
pub fn host_path(root: &Path, container_path: &str) -> PathBuf {
  root.join(container_path.trim_start_matches('/'))
}
