mod build;
mod plan;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use boxlua_lib::eval::{collect_variables, load_recipe};
use boxlua_lib::plan::{BuildOptions, Plan};

pub use build::cmd_build;
pub use plan::cmd_plan;

/// Flags that influence how a recipe is flattened.
#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Build from a cached artifact: omit `skip` blocks
  #[arg(long, env = "BOX_FROM_CACHE")]
  pub from_cache: bool,

  /// Set a build variable, overriding the process environment
  #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
  pub vars: Vec<(String, String)>,
}

/// Flags for running a plan on the host.
#[derive(Debug, Args)]
pub struct RunArgs {
  /// Directory holding the image root filesystem
  #[arg(long, env = "BOX_ROOT")]
  pub root: PathBuf,

  /// Build context directory that `copy` sources are relative to
  #[arg(long, env = "BOX_CONTEXT", default_value = ".")]
  pub context: PathBuf,

  /// Command prefix for shell steps, e.g. "chroot /srv/root /bin/sh -c".
  /// The prefix must change root into the image: each command is run as
  /// `cd <workdir> && <cmd>` with the image path as seen inside it
  #[arg(long)]
  pub shell: Option<String>,

  /// Per-request timeout for artifact downloads
  #[arg(long, default_value = "30s")]
  pub fetch_timeout: humantime::Duration,

  /// Retries for transient download failures
  #[arg(long, default_value_t = 2)]
  pub fetch_retries: u32,

  /// Delay between download retries
  #[arg(long, default_value = "1s")]
  pub fetch_retry_delay: humantime::Duration,
}

impl RunArgs {
  pub fn fetch_timeout(&self) -> Duration {
    self.fetch_timeout.into()
  }

  pub fn fetch_retry_delay(&self) -> Duration {
    self.fetch_retry_delay.into()
  }

  pub fn shell(&self) -> Option<Vec<String>> {
    self
      .shell
      .as_deref()
      .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
      .filter(|parts| !parts.is_empty())
  }
}

/// Where `box build` gets its plan from.
pub enum PlanSource {
  Recipe(PathBuf),
  Plan(PathBuf),
}

/// Parse a `KEY=VALUE` pair.
fn parse_var(s: &str) -> Result<(String, String), String> {
  let (key, value) = s
    .split_once('=')
    .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
  if key.is_empty() {
    return Err(format!("empty variable name in '{}'", s));
  }
  Ok((key.to_string(), value.to_string()))
}

/// Evaluate a recipe and flatten it into a plan.
fn build_plan(recipe: &Path, args: &BuildArgs) -> Result<Plan> {
  let loaded = load_recipe(recipe).with_context(|| format!("Failed to evaluate recipe: {}", recipe.display()))?;

  let vars = collect_variables(args.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));
  let options = BuildOptions {
    from_cache: args.from_cache,
  };

  boxlua_lib::plan::build(&loaded, &vars, &options).with_context(|| format!("Failed to build plan: {}", recipe.display()))
}
