//! Implementation of the `box build` command.
//!
//! This command builds a plan (or loads a saved one) and runs it against an
//! image root directory, printing the resulting image specification.

use std::fs;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use boxlua_lib::execute::{
  ExecuteConfig, ExecutionResult, FetchConfig, HostExecutor, HttpFetcher, PlanRunner,
};
use boxlua_lib::plan::Plan;

use super::{BuildArgs, PlanSource, RunArgs, build_plan};
use crate::output::{OutputFormat, format_duration, print_image, print_json, print_step_failure, print_success};

pub fn cmd_build(source: &PlanSource, args: &BuildArgs, run: &RunArgs, format: OutputFormat) -> Result<()> {
  let plan = match source {
    PlanSource::Recipe(recipe) => build_plan(recipe, args)?,
    PlanSource::Plan(path) => {
      if args.from_cache || !args.vars.is_empty() {
        warn!(plan = %path.display(), "--from-cache and --var are ignored for a saved plan");
      }
      let content = fs::read_to_string(path).with_context(|| format!("Failed to read plan: {}", path.display()))?;
      Plan::from_json(&content).with_context(|| format!("Failed to parse plan: {}", path.display()))?
    }
  };

  fs::create_dir_all(&run.root).with_context(|| format!("Failed to create root: {}", run.root.display()))?;
  let root = dunce::canonicalize(&run.root).with_context(|| format!("Failed to resolve root: {}", run.root.display()))?;
  let context = dunce::canonicalize(&run.context)
    .with_context(|| format!("Failed to resolve build context: {}", run.context.display()))?;
  info!(root = %root.display(), context = %context.display(), "building image");

  let executor = HostExecutor::new(ExecuteConfig {
    root: root.clone(),
    context,
    shell: run.shell(),
  });
  let fetcher = HttpFetcher::new(FetchConfig {
    root,
    timeout: run.fetch_timeout(),
    retries: run.fetch_retries,
    retry_delay: run.fetch_retry_delay(),
  })
  .context("Failed to create HTTP client")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  let result = rt.block_on(PlanRunner::new(executor, fetcher).run(&plan));
  let elapsed = started.elapsed();

  match result {
    ExecutionResult::Succeeded(image) => {
      if format.is_json() {
        print_json(&image)?;
      } else {
        print_success(&format!("Built image from {} in {}", image.from, format_duration(elapsed)));
        print_image(&image);
      }
      Ok(())
    }
    ExecutionResult::Failed { index, step, cause } => {
      print_step_failure(index, &step);
      bail!("build failed at step {}: {}", index, cause)
    }
  }
}
