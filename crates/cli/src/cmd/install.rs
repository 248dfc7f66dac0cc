//! Implementation of the `cellar install` command.
//!
//! Plans the requested packages, then builds and installs them with the
//! selected failure policy. Each entry's outcome is printed; failed entries
//! show the tail of their captured output.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};

use cellar_lib::execute::{EntryState, ExecuteConfig, ExecutionReport, FailurePolicy};
use cellar_lib::install::{install, prepare_install, target_platform};
use cellar_lib::receipt::ReceiptStore;

use super::plan::show_plan;
use super::{GlobalArgs, load_recipes};
use crate::output::{format_duration, print_error, print_json, print_success, print_tail, print_warning, state_symbol};

const OUTPUT_TAIL_LINES: usize = 20;

pub struct InstallArgs {
  pub packages: Vec<String>,
  pub dry_run: bool,
  pub policy: FailurePolicy,
  pub jobs: Option<usize>,
  pub prefix: Option<PathBuf>,
  pub strict_tests: bool,
  pub build_from_source: bool,
}

pub fn cmd_install(global: &GlobalArgs, args: &InstallArgs) -> Result<ExitCode> {
  let recipes = load_recipes(&global.recipes)?;
  let platform = target_platform(global.platform.as_deref())?;
  let store = ReceiptStore::default_store();

  if args.dry_run {
    let resolution = prepare_install(&recipes, &args.packages, &platform, Some(&store))?;
    show_plan(global, &resolution.plan, &platform)?;
    return Ok(ExitCode::SUCCESS);
  }

  let mut config = ExecuteConfig {
    policy: args.policy,
    tests_block_dependents: args.strict_tests,
    pour_bottles: !args.build_from_source,
    ..ExecuteConfig::default()
  };
  if let Some(jobs) = args.jobs {
    config.parallelism = jobs.max(1);
  }
  if let Some(prefix) = &args.prefix {
    config.prefix_root = prefix.clone();
  }

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let (resolution, report) = rt.block_on(install(&recipes, &args.packages, &platform, config, store))?;

  if global.output.is_json() {
    print_json(&report)?;
  } else {
    if !resolution.plan.satisfied().is_empty() {
      print_success(&format!("Already installed: {}", resolution.plan.satisfied().join(", ")));
    }
    print_report(&report);
  }

  Ok(if report.is_success() {
    ExitCode::SUCCESS
  } else {
    ExitCode::from(1)
  })
}

fn print_report(report: &ExecutionReport) {
  for entry in &report.entries {
    let detail = match entry.state {
      EntryState::Done => format_duration(entry.duration),
      EntryState::Skipped => entry
        .skip_reason
        .as_ref()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "skipped".to_string()),
      _ => entry.state.to_string(),
    };
    println!("{} {} ({})", state_symbol(entry.state), entry.name, detail);
  }

  for entry in report.failed() {
    let Some(error) = &entry.error else {
      continue;
    };
    print_error(&format!("{}: {}", entry.name, error));
    if let Some((stdout, stderr)) = error.captured_output() {
      print_tail("stdout", stdout, OUTPUT_TAIL_LINES);
      print_tail("stderr", stderr, OUTPUT_TAIL_LINES);
    }
  }

  let done = report.count(EntryState::Done);
  let failed = report.count(EntryState::Failed);
  let skipped = report.count(EntryState::Skipped);
  if report.is_success() {
    print_success(&format!("Installed {done} package(s)"));
  } else {
    print_warning(&format!("{done} installed, {failed} failed, {skipped} skipped"));
  }
}
