//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output: colored status
//! messages, numbered plan listings, image summaries and durations.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use boxlua_lib::execute::ImageSpec;
use boxlua_lib::plan::Step;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const INFO: &str = "•";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Short label for a step, used as the first column of plan listings.
pub fn step_kind(step: &Step) -> &'static str {
  match step {
    Step::RunCommand { .. } => "run",
    Step::CopyFile { .. } => "copy",
    Step::SetEnv { .. } => "env",
    Step::SetExec { .. } => "exec",
    Step::EnterScope { .. } => "enter",
    Step::ExitScope => "exit",
    Step::Fetch { .. } => "fetch",
    Step::Release { .. } => "release",
  }
}

fn step_detail(step: &Step) -> String {
  match step {
    Step::RunCommand { cmd } => cmd.clone(),
    Step::CopyFile { src, dst } => format!("{} -> {}", src, dst),
    Step::SetEnv { key, value } => format!("{}={}", key, value),
    Step::SetExec { entrypoint, cmd } => format!("{:?} {:?}", entrypoint, cmd),
    Step::EnterScope { path } => path.clone(),
    Step::ExitScope => String::new(),
    Step::Fetch { url, path, .. } => format!("{} -> {}", url, path),
    Step::Release { path } => path.clone(),
  }
}

/// Print the steps of a plan, indented by scope depth.
pub fn print_steps(steps: &[Step]) {
  let mut depth = 0usize;
  for (index, step) in steps.iter().enumerate() {
    if matches!(step, Step::ExitScope) {
      depth = depth.saturating_sub(1);
    }
    let index = format!("{:>3}", index);
    let kind = format!("{:<7}", step_kind(step));
    println!(
      "  {}  {}{} {}",
      index.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      "  ".repeat(depth),
      kind.if_supports_color(Stream::Stdout, |s| s.cyan()),
      step_detail(step)
    );
    if matches!(step, Step::EnterScope { .. }) {
      depth += 1;
    }
  }
}

/// Print a summary of a built image.
pub fn print_image(image: &ImageSpec) {
  print_stat("Layers", &image.layers.len().to_string());
  print_stat("Entrypoint", &format!("{:?}", image.entrypoint));
  print_stat("Cmd", &format!("{:?}", image.cmd));
  if !image.env.is_empty() {
    println!();
    print_info("Environment");
    for (key, value) in &image.env {
      println!("  {}={}", key, value);
    }
  }
}

/// Print the step a build stopped at.
pub fn print_step_failure(index: usize, step: &Step) {
  print_error(&format!("Step {} failed: {} {}", index, step_kind(step), step_detail(step)));
}
