//! Plan execution module.
//!
//! [`PlanRunner`] executes a [`Plan`] step by step against a
//! [`StepExecutor`] and an [`ArtifactFetcher`]. It handles:
//! - Validation before any step runs
//! - The working-directory scope stack
//! - Accumulating the [`ImageSpec`]
//! - Releasing staged artifacts when a step fails

pub mod actions;
pub mod types;

use tracing::{debug, error, info, warn};

use crate::consts::ROOT_SCOPE;
use crate::plan::{Plan, Step, scope};

pub use actions::{ArtifactFetcher, HostExecutor, HttpFetcher, StepExecutor};
pub use types::{
  ExecuteConfig, ExecuteError, ExecutionResult, FetchConfig, FetchError, ImageSpec, Layer, StepError,
};

/// Runs plans strictly in order, awaiting each step before the next.
pub struct PlanRunner<E, F> {
  executor: E,
  fetcher: F,
}

/// Mutable state of a single run.
struct RunState {
  scopes: Vec<String>,
  /// Artifacts fetched (or being fetched) and not yet released, in fetch
  /// order.
  staged: Vec<String>,
  image: ImageSpec,
}

impl RunState {
  fn cwd(&self) -> &str {
    self.scopes.last().map(|s| s.as_str()).unwrap_or(ROOT_SCOPE)
  }
}

impl<E: StepExecutor, F: ArtifactFetcher> PlanRunner<E, F> {
  pub fn new(executor: E, fetcher: F) -> Self {
    Self { executor, fetcher }
  }

  /// Execute every step of `plan`.
  ///
  /// Stops at the first failing step. Artifacts staged at that point are
  /// released before the failure is returned; release problems during this
  /// cleanup are logged and do not replace the original cause.
  pub async fn run(&self, plan: &Plan) -> ExecutionResult {
    if let Err(e) = plan.validate() {
      // A plan can only be invalid if it has steps.
      let index = e.index().unwrap_or(plan.steps.len().saturating_sub(1));
      error!(index, error = %e, "refusing to run invalid plan");
      return ExecutionResult::Failed {
        index,
        step: plan.steps[index].clone(),
        cause: ExecuteError::InvalidPlan(e),
      };
    }

    info!(from = %plan.from, steps = plan.steps.len(), "running plan");

    let mut state = RunState {
      scopes: Vec::new(),
      staged: Vec::new(),
      image: ImageSpec {
        from: plan.from.clone(),
        ..Default::default()
      },
    };

    for (index, step) in plan.steps.iter().enumerate() {
      info!(index, step = %step, "step");
      if let Err(cause) = self.execute_step(&mut state, step).await {
        error!(index, step = %step, error = %cause, "step failed");
        self.release_staged(&mut state).await;
        return ExecutionResult::Failed {
          index,
          step: step.clone(),
          cause,
        };
      }
    }

    info!(layers = state.image.layers.len(), "plan succeeded");
    ExecutionResult::Succeeded(state.image)
  }

  async fn execute_step(&self, state: &mut RunState, step: &Step) -> Result<(), ExecuteError> {
    match step {
      Step::RunCommand { cmd } => {
        let workdir = state.cwd().to_string();
        self.executor.run_command(cmd, &workdir, &state.image.env).await?;
        state.image.layers.push(Layer {
          workdir,
          step: step.clone(),
        });
      }
      Step::CopyFile { src, dst } => {
        let workdir = state.cwd().to_string();
        let dst = scope::resolve_destination(&workdir, dst);
        self.executor.copy_file(src, &dst).await?;
        state.image.layers.push(Layer {
          workdir,
          step: Step::CopyFile { src: src.clone(), dst },
        });
      }
      Step::SetEnv { key, value } => {
        state.image.env.insert(key.clone(), value.clone());
      }
      Step::SetExec { entrypoint, cmd } => {
        state.image.entrypoint = entrypoint.clone();
        state.image.cmd = cmd.clone();
      }
      Step::EnterScope { path } => {
        debug!(path = %path, "entering scope");
        state.scopes.push(path.clone());
      }
      Step::ExitScope => {
        state.scopes.pop();
      }
      Step::Fetch { url, path, sha256 } => {
        // Tracked before the call so a partially written path is released too.
        state.staged.push(path.clone());
        self.fetcher.fetch(url, path, sha256.as_deref()).await?;
      }
      Step::Release { path } => {
        // Untracked before the call so a failed release is not retried.
        state.staged.retain(|p| p != path);
        self.fetcher.release(path).await?;
      }
    }
    Ok(())
  }

  async fn release_staged(&self, state: &mut RunState) {
    while let Some(path) = state.staged.pop() {
      debug!(path = %path, "releasing staged artifact after failure");
      if let Err(e) = self.fetcher.release(&path).await {
        warn!(path = %path, error = %e, "failed to release artifact during cleanup");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use tempfile::TempDir;
  use tracing_test::traced_test;

  use super::*;
  use crate::plan::PlanError;
  use crate::util::testutil::{CallLog, MockExecutor, MockFetcher, calls};

  fn run(cmd: &str) -> Step {
    Step::RunCommand { cmd: cmd.to_string() }
  }

  fn enter(path: &str) -> Step {
    Step::EnterScope { path: path.to_string() }
  }

  fn fetch(path: &str) -> Step {
    Step::Fetch {
      url: format!("https://example.com{path}"),
      path: path.to_string(),
      sha256: None,
    }
  }

  fn release(path: &str) -> Step {
    Step::Release { path: path.to_string() }
  }

  fn env(key: &str, value: &str) -> Step {
    Step::SetEnv {
      key: key.to_string(),
      value: value.to_string(),
    }
  }

  fn plan(steps: Vec<Step>) -> Plan {
    Plan {
      from: "debian:latest".to_string(),
      steps,
    }
  }

  fn runner(log: &CallLog) -> PlanRunner<MockExecutor, MockFetcher> {
    PlanRunner::new(MockExecutor::new(log), MockFetcher::new(log))
  }

  #[tokio::test]
  async fn env_scope_and_set_exec_scenario() {
    let log = CallLog::default();
    let p = plan(vec![
      env("FOO", "1"),
      enter("/tmp"),
      Step::CopyFile {
        src: "a".to_string(),
        dst: "b".to_string(),
      },
      Step::ExitScope,
      Step::SetExec {
        entrypoint: vec!["/e".to_string()],
        cmd: vec!["/c".to_string()],
      },
    ]);

    let result = runner(&log).run(&p).await;

    let image = result.image().unwrap();
    assert_eq!(image.from, "debian:latest");
    assert_eq!(image.env, BTreeMap::from([("FOO".to_string(), "1".to_string())]));
    assert_eq!(image.entrypoint, vec!["/e"]);
    assert_eq!(image.cmd, vec!["/c"]);
    assert_eq!(
      image.layers,
      vec![Layer {
        workdir: "/tmp".to_string(),
        step: Step::CopyFile {
          src: "a".to_string(),
          dst: "/tmp/b".to_string(),
        },
      }]
    );
    assert_eq!(calls(&log), vec!["copy a -> /tmp/b"]);
  }

  #[tokio::test]
  async fn commands_see_accumulated_env() {
    let log = CallLog::default();
    let r = runner(&log);
    let p = plan(vec![
      run("first"),
      env("GOCACHE", "/tmp/a"),
      env("GOCACHE", "/tmp/go-build-cache"),
      run("second"),
    ]);

    let result = r.run(&p).await;

    assert!(result.is_success());
    let envs = r.executor.envs.lock().unwrap().clone();
    assert!(envs[0].is_empty());
    assert_eq!(
      envs[1],
      BTreeMap::from([("GOCACHE".to_string(), "/tmp/go-build-cache".to_string())])
    );
  }

  #[tokio::test]
  async fn set_exec_overwrites_wholesale() {
    let log = CallLog::default();
    let p = plan(vec![
      Step::SetExec {
        entrypoint: vec!["sh".to_string(), "/entrypoint.sh".to_string()],
        cmd: vec!["bash".to_string()],
      },
      Step::SetExec {
        entrypoint: vec!["/bin/app".to_string()],
        cmd: vec![],
      },
    ]);

    let result = runner(&log).run(&p).await;

    let image = result.image().unwrap();
    assert_eq!(image.entrypoint, vec!["/bin/app"]);
    assert!(image.cmd.is_empty());
  }

  #[tokio::test]
  async fn nested_scopes_set_workdir() {
    let log = CallLog::default();
    let p = plan(vec![
      run("apt update"),
      enter("/tmp"),
      run("tar vxzf ldnsd.tar.gz"),
      enter("/tmp/ldnsd"),
      run("make"),
      Step::ExitScope,
      run("ls"),
      Step::ExitScope,
      run("true"),
    ]);

    assert!(runner(&log).run(&p).await.is_success());
    assert_eq!(
      calls(&log),
      vec![
        "run apt update @ /",
        "run tar vxzf ldnsd.tar.gz @ /tmp",
        "run make @ /tmp/ldnsd",
        "run ls @ /tmp",
        "run true @ /",
      ]
    );
  }

  #[tokio::test]
  async fn failure_stops_run_and_releases_once() {
    let log = CallLog::default();
    let r = PlanRunner::new(MockExecutor::new(&log).failing_on("chmod 0755 /mkcert"), MockFetcher::new(&log));
    let p = plan(vec![
      fetch("/mkcert"),
      run("chmod 0755 /mkcert"),
      run("mv /mkcert /usr/local/bin"),
      release("/mkcert"),
      run("never"),
    ]);

    let result = r.run(&p).await;

    match result {
      ExecutionResult::Failed { index, step, cause } => {
        assert_eq!(index, 1);
        assert_eq!(step, run("chmod 0755 /mkcert"));
        assert!(matches!(cause, ExecuteError::Step(StepError::NonZeroExit { .. })));
      }
      other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(
      calls(&log),
      vec![
        "fetch https://example.com/mkcert -> /mkcert",
        "run chmod 0755 /mkcert @ /",
        "release /mkcert",
      ]
    );
  }

  #[tokio::test]
  async fn released_artifacts_are_not_released_again() {
    let log = CallLog::default();
    let r = PlanRunner::new(MockExecutor::new(&log).failing_on("boom"), MockFetcher::new(&log));
    let p = plan(vec![
      fetch("/a"),
      release("/a"),
      fetch("/b"),
      enter("/tmp"),
      fetch("/c"),
      run("boom"),
      release("/c"),
      Step::ExitScope,
      release("/b"),
    ]);

    let result = r.run(&p).await;

    assert!(matches!(result, ExecutionResult::Failed { index: 5, .. }));
    let releases: Vec<String> = calls(&log).into_iter().filter(|c| c.starts_with("release")).collect();
    assert_eq!(releases, vec!["release /a", "release /c", "release /b"]);
  }

  #[tokio::test]
  async fn fetch_failure_releases_earlier_artifacts() {
    let log = CallLog::default();
    let r = PlanRunner::new(
      MockExecutor::new(&log),
      MockFetcher::new(&log).failing_url("https://example.com/b"),
    );
    let p = plan(vec![fetch("/a"), fetch("/b"), release("/b"), release("/a")]);

    let result = r.run(&p).await;

    match result {
      ExecutionResult::Failed { index, cause, .. } => {
        assert_eq!(index, 1);
        assert!(matches!(cause, ExecuteError::Fetch(ref e) if e.is_retryable()));
      }
      other => panic!("expected failure, got {other:?}"),
    }
    let releases: Vec<String> = calls(&log).into_iter().filter(|c| c.starts_with("release")).collect();
    assert_eq!(releases, vec!["release /b", "release /a"]);
  }

  #[tokio::test]
  async fn partially_written_artifact_is_released() {
    let temp = TempDir::new().unwrap();
    let log = CallLog::default();
    let r = PlanRunner::new(
      MockExecutor::new(&log),
      MockFetcher::new(&log).writing_then_failing(temp.path()),
    );
    let p = plan(vec![fetch("/protoc.zip"), run("unzip protoc.zip"), release("/protoc.zip")]);

    let result = r.run(&p).await;

    assert!(matches!(
      result,
      ExecutionResult::Failed {
        index: 0,
        cause: ExecuteError::Fetch(FetchError::Write { .. }),
        ..
      }
    ));
    assert_eq!(
      calls(&log),
      vec!["fetch https://example.com/protoc.zip -> /protoc.zip", "release /protoc.zip"]
    );
    assert!(!temp.path().join("protoc.zip").exists());
  }

  #[tokio::test]
  async fn invalid_plan_runs_nothing() {
    let log = CallLog::default();
    let p = plan(vec![run("apt update"), Step::ExitScope, run("never")]);

    let result = runner(&log).run(&p).await;

    match result {
      ExecutionResult::Failed { index, step, cause } => {
        assert_eq!(index, 1);
        assert_eq!(step, Step::ExitScope);
        assert!(matches!(
          cause,
          ExecuteError::InvalidPlan(PlanError::UnbalancedExit { index: 1 })
        ));
      }
      other => panic!("expected failure, got {other:?}"),
    }
    assert!(calls(&log).is_empty());
  }

  #[tokio::test]
  async fn unclosed_scope_points_at_last_step() {
    let log = CallLog::default();
    let p = plan(vec![enter("/tmp"), run("ls")]);

    let result = runner(&log).run(&p).await;

    assert!(matches!(
      result,
      ExecutionResult::Failed {
        index: 1,
        cause: ExecuteError::InvalidPlan(PlanError::UnclosedScope { depth: 1 }),
        ..
      }
    ));
    assert!(calls(&log).is_empty());
  }

  #[tokio::test]
  #[traced_test]
  async fn cleanup_release_failure_is_logged() {
    let log = CallLog::default();
    let r = PlanRunner::new(
      MockExecutor::new(&log).failing_on("boom"),
      MockFetcher::new(&log).failing_release(),
    );
    let p = plan(vec![fetch("/a"), run("boom"), release("/a")]);

    let result = r.run(&p).await;

    assert!(matches!(
      result,
      ExecutionResult::Failed {
        index: 1,
        cause: ExecuteError::Step(_),
        ..
      }
    ));
    assert!(logs_contain("failed to release artifact during cleanup"));
  }

  #[tokio::test]
  async fn host_run_writes_into_root() {
    let root = TempDir::new().unwrap();
    let context = TempDir::new().unwrap();
    std::fs::write(context.path().join("entrypoint.sh"), "#!/bin/sh\n").unwrap();

    let config = ExecuteConfig {
      root: root.path().to_path_buf(),
      context: context.path().to_path_buf(),
      shell: None,
    };
    let fetch_config = FetchConfig {
      root: root.path().to_path_buf(),
      ..Default::default()
    };
    let r = PlanRunner::new(HostExecutor::new(config), HttpFetcher::new(fetch_config).unwrap());

    let p = plan(vec![
      env("GREETING", "hi"),
      enter("/work"),
      run("echo $GREETING > out.txt"),
      Step::CopyFile {
        src: "entrypoint.sh".to_string(),
        dst: "bin/".to_string(),
      },
      Step::ExitScope,
    ]);

    let result = r.run(&p).await;

    let image = result.image().unwrap();
    assert_eq!(image.layers.len(), 2);
    assert_eq!(
      std::fs::read_to_string(root.path().join("work/out.txt")).unwrap(),
      "hi\n"
    );
    assert!(root.path().join("work/bin/entrypoint.sh").exists());
  }
}
