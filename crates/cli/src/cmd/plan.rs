//! Implementation of the `box plan` command.
//!
//! This command evaluates a recipe, flattens it into a plan and prints it,
//! optionally writing the plan JSON for a later `box build --plan`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use boxlua_lib::util::hash::Hashable;

use super::{BuildArgs, build_plan};
use crate::output::{OutputFormat, print_json, print_stat, print_steps, print_success};

pub fn cmd_plan(recipe: &Path, args: &BuildArgs, out: Option<&Path>, format: OutputFormat) -> Result<()> {
  let plan = build_plan(recipe, args)?;
  let hash = plan.compute_hash().context("Failed to compute plan hash")?;

  if let Some(out) = out {
    let plan_json = serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?;
    fs::write(out, plan_json).with_context(|| format!("Failed to write plan: {}", out.display()))?;
  }

  if format.is_json() {
    return print_json(&serde_json::json!({ "hash": hash, "plan": plan }));
  }

  print_success(&format!("Plan: {}", hash));
  print_stat("From", &plan.from);
  print_stat("Steps", &plan.steps.len().to_string());
  if args.from_cache {
    print_stat("Mode", "from cache");
  }
  println!();
  print_steps(&plan.steps);
  if let Some(out) = out {
    println!();
    print_stat("Path", &out.display().to_string());
  }

  Ok(())
}
