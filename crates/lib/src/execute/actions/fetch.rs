//! Fetch action implementation.
//!
//! This module handles downloading artifacts over HTTP into their staging
//! path, with optional SHA256 verification and retries for transient
//! failures.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{ArtifactFetcher, copy, host_path};
use crate::execute::types::{FetchConfig, FetchError};
use crate::util::hash::hash_bytes;

/// Downloads artifacts with `reqwest`, staging them beneath
/// [`FetchConfig::root`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  config: FetchConfig,
}

impl HttpFetcher {
  pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| FetchError::Network {
        url: String::new(),
        message: e.to_string(),
      })?;
    Ok(Self { client, config })
  }

  async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = self.client.get(url).send().await.map_err(|e| FetchError::Network {
      url: url.to_string(),
      message: e.to_string(),
    })?;

    let status = response.status();
    if is_permanent_client_error(status) {
      return Err(FetchError::NotFound { url: url.to_string() });
    }
    if !status.is_success() {
      return Err(FetchError::Network {
        url: url.to_string(),
        message: format!("HTTP {}", status),
      });
    }

    let bytes = response.bytes().await.map_err(|e| FetchError::Network {
      url: url.to_string(),
      message: e.to_string(),
    })?;
    Ok(bytes.to_vec())
  }

  async fn download_with_retries(&self, url: &str) -> Result<Vec<u8>, FetchError> {
    let mut attempt = 0;
    loop {
      match self.download(url).await {
        Err(e) if e.is_retryable() && attempt < self.config.retries => {
          attempt += 1;
          warn!(url = %url, attempt, error = %e, "fetch failed, retrying");
          tokio::time::sleep(self.config.retry_delay).await;
        }
        result => return result,
      }
    }
  }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
  async fn fetch(&self, url: &str, path: &str, sha256: Option<&str>) -> Result<PathBuf, FetchError> {
    info!(url = %url, path = %path, "fetching artifact");

    let bytes = self.download_with_retries(url).await?;

    if let Some(expected) = sha256 {
      let actual = hash_bytes(&bytes);
      if !actual.matches(expected) {
        return Err(FetchError::ChecksumMismatch {
          url: url.to_string(),
          expected: expected.to_string(),
          actual: actual.0,
        });
      }
      debug!(sha256 = %actual, "checksum verified");
    }

    let dest = host_path(&self.config.root, path);
    write_staged(&dest, &bytes).await.map_err(|e| FetchError::Write {
      path: path.to_string(),
      message: e.to_string(),
    })?;

    info!(path = ?dest, size = bytes.len(), "download complete");

    Ok(dest)
  }

  async fn release(&self, path: &str) -> Result<(), FetchError> {
    let dest = host_path(&self.config.root, path);
    debug!(path = ?dest, "releasing artifact");

    tokio::task::spawn_blocking(move || copy::remove_path(&dest))
      .await
      .map_err(std::io::Error::other)
      .and_then(|r| r)
      .map_err(|e| FetchError::Write {
        path: path.to_string(),
        message: e.to_string(),
      })
  }
}

async fn write_staged(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent).await?;
  }
  let mut file = fs::File::create(dest).await?;
  let written = match file.write_all(bytes).await {
    Ok(()) => file.flush().await,
    Err(e) => Err(e),
  };
  if written.is_err() {
    drop(file);
    // Never leave a truncated artifact at the staging path.
    if let Err(e) = fs::remove_file(dest).await {
      warn!(path = ?dest, error = %e, "failed to remove partial download");
    }
  }
  written
}

/// Statuses that name a missing or forbidden resource. Timeouts and rate
/// limits are transient.
fn is_permanent_client_error(status: reqwest::StatusCode) -> bool {
  use reqwest::StatusCode;
  status.is_client_error() && !matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS)
}
