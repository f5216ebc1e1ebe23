//! Host step executor.
//!
//! Runs `RunCommand` steps through a shell with the accumulated image
//! environment, and `CopyFile` steps as plain filesystem copies beneath the
//! configured root.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{StepExecutor, copy, host_path};
use crate::consts::DEFAULT_PATH;
use crate::execute::types::{ExecuteConfig, StepError};

/// Executes steps on the host, mapping container paths under
/// [`ExecuteConfig::root`].
#[derive(Debug, Clone, Default)]
pub struct HostExecutor {
  config: ExecuteConfig,
}

impl HostExecutor {
  pub fn new(config: ExecuteConfig) -> Self {
    Self { config }
  }
}

#[async_trait]
impl StepExecutor for HostExecutor {
  async fn run_command(&self, cmd: &str, workdir: &str, env: &BTreeMap<String, String>) -> Result<(), StepError> {
    info!(cmd = %cmd, workdir = %workdir, "executing command");

    let host_dir = host_path(&self.config.root, workdir);
    tokio::fs::create_dir_all(&host_dir).await?;

    let (shell_cmd, shell_args) = get_shell(self.config.shell.as_deref());

    // A wrapper such as chroot resets the working directory, so the scope is
    // re-entered inside the command text.
    let script = if self.config.shell.is_some() {
      format!("cd {} && {}", shell_quote(workdir), cmd)
    } else {
      cmd.to_string()
    };

    let mut command = Command::new(&shell_cmd);
    command.args(&shell_args).arg(&script).current_dir(&host_dir).env_clear();
    if !env.contains_key("PATH") {
      command.env("PATH", DEFAULT_PATH);
    }
    command.envs(env);

    debug!(shell = %shell_cmd, working_dir = ?host_dir, "spawning process");

    let output = command.output().await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.is_empty() {
      debug!(stdout = %stdout.trim_end(), "command stdout");
    }
    if !stderr.is_empty() {
      debug!(stderr = %stderr.trim_end(), "command stderr");
    }

    if !output.status.success() {
      return Err(StepError::NonZeroExit {
        cmd: cmd.to_string(),
        code: output.status.code(),
      });
    }

    Ok(())
  }

  async fn copy_file(&self, src: &str, dst: &str) -> Result<(), StepError> {
    info!(src = %src, dst = %dst, "copying");

    let context = self.config.context.clone();
    let src = src.to_string();
    let target = host_path(&self.config.root, dst);
    let into_dir = dst.ends_with('/');

    tokio::task::spawn_blocking(move || copy::copy_into(&context, &src, &target, into_dir))
      .await
      .map_err(|e| StepError::Io(std::io::Error::other(e)))?
  }
}

/// Get the shell command and arguments.
///
/// With no override, commands run through `/bin/sh -c`. An override is used
/// verbatim as the command prefix.
fn get_shell(override_shell: Option<&[String]>) -> (String, Vec<String>) {
  if let Some((shell, args)) = override_shell.and_then(|s| s.split_first()) {
    return (shell.clone(), args.to_vec());
  }
  ("/bin/sh".to_string(), vec!["-c".to_string()])
}

fn shell_quote(s: &str) -> String {
  format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use super::*;
  use tempfile::TempDir;

  fn executor(root: &Path) -> HostExecutor {
    HostExecutor::new(ExecuteConfig {
      root: root.to_path_buf(),
      context: root.to_path_buf(),
      shell: None,
    })
  }

  #[tokio::test]
  async fn command_runs_in_mapped_workdir() {
    let temp_dir = TempDir::new().unwrap();
    let exec = executor(temp_dir.path());

    exec
      .run_command("echo hello > marker", "/tmp/work", &BTreeMap::new())
      .await
      .unwrap();

    let marker = temp_dir.path().join("tmp/work/marker");
    assert_eq!(std::fs::read_to_string(marker).unwrap(), "hello\n");
  }

  #[tokio::test]
  async fn command_receives_image_env() {
    let temp_dir = TempDir::new().unwrap();
    let exec = executor(temp_dir.path());

    let env = BTreeMap::from([("GOCACHE".to_string(), "/tmp/go-build-cache".to_string())]);
    exec.run_command("echo $GOCACHE > env_out", "/", &env).await.unwrap();

    let out = std::fs::read_to_string(temp_dir.path().join("env_out")).unwrap();
    assert_eq!(out.trim(), "/tmp/go-build-cache");
  }

  #[tokio::test]
  async fn command_env_is_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let exec = executor(temp_dir.path());

    exec
      .run_command("echo \"${HOME:-unset}:$PATH\" > env_out", "/", &BTreeMap::new())
      .await
      .unwrap();

    let out = std::fs::read_to_string(temp_dir.path().join("env_out")).unwrap();
    assert_eq!(out.trim(), format!("unset:{DEFAULT_PATH}"));
  }

  #[tokio::test]
  async fn command_failure_reports_exit_code() {
    let temp_dir = TempDir::new().unwrap();
    let exec = executor(temp_dir.path());

    let result = exec.run_command("exit 3", "/", &BTreeMap::new()).await;

    assert!(matches!(result, Err(StepError::NonZeroExit { code: Some(3), .. })));
  }

  #[tokio::test]
  async fn wrapper_shell_reenters_workdir() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir_all(temp_dir.path().join("opt")).unwrap();
    let exec = HostExecutor::new(ExecuteConfig {
      root: temp_dir.path().to_path_buf(),
      context: temp_dir.path().to_path_buf(),
      shell: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
    });

    let target = temp_dir.path().join("opt");
    let workdir = target.to_str().unwrap();
    exec
      .run_command("pwd > here", workdir, &BTreeMap::new())
      .await
      .unwrap();

    let here = std::fs::read_to_string(target.join("here")).unwrap();
    assert_eq!(
      dunce::canonicalize(here.trim()).unwrap(),
      dunce::canonicalize(&target).unwrap()
    );
  }

  #[test]
  fn get_shell_default() {
    let (shell, args) = get_shell(None);
    assert_eq!(shell, "/bin/sh");
    assert_eq!(args, vec!["-c"]);
  }

  #[test]
  fn get_shell_with_wrapper() {
    let wrapper = vec![
      "chroot".to_string(),
      "/srv/root".to_string(),
      "/bin/sh".to_string(),
      "-c".to_string(),
    ];
    let (shell, args) = get_shell(Some(&wrapper));
    assert_eq!(shell, "chroot");
    assert_eq!(args, vec!["/srv/root", "/bin/sh", "-c"]);
  }

  #[test]
  fn get_shell_empty_override_falls_back() {
    let (shell, _) = get_shell(Some(&[]));
    assert_eq!(shell, "/bin/sh");
  }

  #[test]
  fn shell_quote_escapes_single_quotes() {
    assert_eq!(shell_quote("/tmp/it's"), r"'/tmp/it'\''s'");
  }
}
