mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cellar_lib::execute::FailurePolicy;
use cellar_lib::graph::GraphError;
use cellar_lib::install::ResolutionError;
use cellar_lib::platform::PlatformParseError;
use cellar_lib::recipe::RecipeError;

use cmd::{GlobalArgs, InstallArgs};
use output::{OutputFormat, print_error};

/// cellar - resolve, plan and install packages from recipes
#[derive(Parser)]
#[command(name = "cellar")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Directory of recipe files
  #[arg(long, global = true, env = "CELLAR_RECIPES", default_value = "recipes")]
  recipes: PathBuf,

  /// Target platform as <os>-<version>-<arch> (default: this machine)
  #[arg(long, global = true)]
  platform: Option<String>,

  /// Print machine-readable JSON
  #[arg(long, global = true)]
  json: bool,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Print the platform-resolved dependencies of packages
  Resolve {
    /// Packages to resolve (default: every recipe)
    packages: Vec<String>,
  },

  /// Print the install order without executing anything
  Plan {
    /// Packages to install (default: every recipe)
    packages: Vec<String>,
  },

  /// Plan and execute an install
  Install {
    /// Packages to install
    #[arg(required = true)]
    packages: Vec<String>,

    /// Plan only; do not build anything
    #[arg(long)]
    dry_run: bool,

    /// What to do when an entry fails: stop or best-effort
    #[arg(long, default_value = "stop")]
    policy: FailurePolicy,

    /// Maximum number of packages built at once
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Root directory for package prefixes
    #[arg(long)]
    prefix: Option<PathBuf>,

    /// Treat a failed post-install test as blocking for dependents
    #[arg(long)]
    strict_tests: bool,

    /// Build from source even when a bottle matches the platform
    #[arg(long)]
    build_from_source: bool,
  },

  /// Show the detected platform and directories
  Info,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let recipes = dunce::canonicalize(&cli.recipes).unwrap_or(cli.recipes);
  let global = GlobalArgs {
    recipes,
    platform: cli.platform,
    output: OutputFormat::from_flag(cli.json),
    verbose: cli.verbose,
  };

  let result = match cli.command {
    Commands::Resolve { packages } => cmd::cmd_resolve(&global, &packages).map(|()| ExitCode::SUCCESS),
    Commands::Plan { packages } => cmd::cmd_plan(&global, &packages).map(|()| ExitCode::SUCCESS),
    Commands::Install {
      packages,
      dry_run,
      policy,
      jobs,
      prefix,
      strict_tests,
      build_from_source,
    } => cmd::cmd_install(
      &global,
      &InstallArgs {
        packages,
        dry_run,
        policy,
        jobs,
        prefix,
        strict_tests,
        build_from_source,
      },
    ),
    Commands::Info => cmd::cmd_info(&global).map(|()| ExitCode::SUCCESS),
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{e:#}"));
      exit_code_for(&e)
    }
  }
}

/// 2 for anything that stopped resolution before execution, 1 otherwise.
fn exit_code_for(error: &anyhow::Error) -> ExitCode {
  let resolution = error.chain().any(|cause| {
    cause.is::<ResolutionError>()
      || cause.is::<GraphError>()
      || cause.is::<RecipeError>()
      || cause.is::<PlatformParseError>()
  });
  ExitCode::from(if resolution { 2 } else { 1 })
}
