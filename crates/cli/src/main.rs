mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, RunArgs};
use output::OutputFormat;

/// boxlua - declarative image build plans
#[derive(Parser)]
#[command(name = "box")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short = 'o', long = "output", global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Flatten a recipe into a plan without running it
  Plan {
    /// Path to the recipe (.lua or .json)
    recipe: PathBuf,

    #[command(flatten)]
    build: BuildArgs,

    /// Write the plan JSON to this file
    #[arg(long)]
    out: Option<PathBuf>,
  },

  /// Build a recipe (or a saved plan) into an image root
  Build {
    /// Path to the recipe (.lua or .json)
    #[arg(required_unless_present = "plan")]
    recipe: Option<PathBuf>,

    /// Run a plan previously written by `box plan --out`
    #[arg(long, conflicts_with = "recipe")]
    plan: Option<PathBuf>,

    #[command(flatten)]
    build: BuildArgs,

    #[command(flatten)]
    run: RunArgs,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Plan { recipe, build, out } => cmd::cmd_plan(&recipe, &build, out.as_deref(), cli.output),
    Commands::Build {
      recipe,
      plan,
      build,
      run,
    } => {
      let source = match (recipe, plan) {
        (_, Some(plan)) => cmd::PlanSource::Plan(plan),
        (Some(recipe), None) => cmd::PlanSource::Recipe(recipe),
        (None, None) => anyhow::bail!("either a recipe or --plan is required"),
      };
      cmd::cmd_build(&source, &build, &run, cli.output)
    }
  }
}
