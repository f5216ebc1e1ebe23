//! Test utilities for boxlua-lib.
//!
//! Recording collaborators for runner tests. The executor and fetcher share
//! one [`CallLog`] so the interleaving of their calls can be asserted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::execute::actions::{ArtifactFetcher, StepExecutor, host_path};
use crate::execute::types::{FetchError, StepError};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn calls(log: &CallLog) -> Vec<String> {
  log.lock().unwrap().clone()
}

/// Step executor that records calls and optionally fails one command.
#[derive(Default)]
pub struct MockExecutor {
  pub log: CallLog,
  /// Commands equal to this fail with exit code 1.
  pub fail_cmd: Option<String>,
  /// Environment passed to each command, in call order.
  pub envs: Mutex<Vec<BTreeMap<String, String>>>,
}

impl MockExecutor {
  pub fn new(log: &CallLog) -> Self {
    Self {
      log: log.clone(),
      ..Default::default()
    }
  }

  pub fn failing_on(mut self, cmd: &str) -> Self {
    self.fail_cmd = Some(cmd.to_string());
    self
  }
}

#[async_trait]
impl StepExecutor for MockExecutor {
  async fn run_command(&self, cmd: &str, workdir: &str, env: &BTreeMap<String, String>) -> Result<(), StepError> {
    self.log.lock().unwrap().push(format!("run {cmd} @ {workdir}"));
    self.envs.lock().unwrap().push(env.clone());
    if self.fail_cmd.as_deref() == Some(cmd) {
      return Err(StepError::NonZeroExit {
        cmd: cmd.to_string(),
        code: Some(1),
      });
    }
    Ok(())
  }

  async fn copy_file(&self, src: &str, dst: &str) -> Result<(), StepError> {
    self.log.lock().unwrap().push(format!("copy {src} -> {dst}"));
    Ok(())
  }
}

/// Artifact fetcher that records calls and optionally fails.
#[derive(Default)]
pub struct MockFetcher {
  pub log: CallLog,
  /// Fetches of this URL fail with a network error.
  pub fail_url: Option<String>,
  /// Every release fails with a write error.
  pub fail_release: bool,
  /// Fetches write a truncated file beneath this root, then fail. Releases
  /// remove it again.
  pub partial_root: Option<PathBuf>,
}

impl MockFetcher {
  pub fn new(log: &CallLog) -> Self {
    Self {
      log: log.clone(),
      ..Default::default()
    }
  }

  pub fn failing_url(mut self, url: &str) -> Self {
    self.fail_url = Some(url.to_string());
    self
  }

  pub fn failing_release(mut self) -> Self {
    self.fail_release = true;
    self
  }

  pub fn writing_then_failing(mut self, root: &Path) -> Self {
    self.partial_root = Some(root.to_path_buf());
    self
  }
}

#[async_trait]
impl ArtifactFetcher for MockFetcher {
  async fn fetch(&self, url: &str, path: &str, _sha256: Option<&str>) -> Result<PathBuf, FetchError> {
    self.log.lock().unwrap().push(format!("fetch {url} -> {path}"));
    if self.fail_url.as_deref() == Some(url) {
      return Err(FetchError::Network {
        url: url.to_string(),
        message: "connection reset".to_string(),
      });
    }
    if let Some(root) = &self.partial_root {
      std::fs::write(host_path(root, path), "trunc").unwrap();
      return Err(FetchError::Write {
        path: path.to_string(),
        message: "no space left on device".to_string(),
      });
    }
    Ok(PathBuf::from(path))
  }

  async fn release(&self, path: &str) -> Result<(), FetchError> {
    self.log.lock().unwrap().push(format!("release {path}"));
    if let Some(root) = &self.partial_root {
      let _ = std::fs::remove_file(host_path(root, path));
    }
    if self.fail_release {
      return Err(FetchError::Write {
        path: path.to_string(),
        message: "device busy".to_string(),
      });
    }
    Ok(())
  }
}
