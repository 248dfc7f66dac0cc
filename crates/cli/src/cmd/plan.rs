//! Implementation of the `cellar plan` command.
//!
//! Resolves the requested packages against the recipe directory and the
//! installed receipts and prints the install order. Nothing is executed.

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use cellar_lib::install::{prepare_install, target_platform};
use cellar_lib::plan::{Plan, PlanReason};
use cellar_lib::platform::PlatformDescriptor;
use cellar_lib::receipt::ReceiptStore;

use super::{GlobalArgs, load_recipes};
use crate::output::{print_info, print_json, print_stat, print_success, symbols};

pub fn cmd_plan(global: &GlobalArgs, packages: &[String]) -> Result<()> {
  let recipes = load_recipes(&global.recipes)?;
  let platform = target_platform(global.platform.as_deref())?;
  let store = ReceiptStore::default_store();

  let resolution = prepare_install(&recipes, packages, &platform, Some(&store))?;
  show_plan(global, &resolution.plan, &platform)
}

/// Print a plan in the selected output format.
pub(super) fn show_plan(global: &GlobalArgs, plan: &Plan, platform: &PlatformDescriptor) -> Result<()> {
  if global.output.is_json() {
    return print_json(plan);
  }

  if plan.is_empty() {
    print_success("Nothing to install");
  } else {
    print_info(&format!("Install plan for {}", platform));
  }

  for (i, entry) in plan.entries().iter().enumerate() {
    let reason = match entry.reason {
      PlanReason::Target => "requested".to_string(),
      PlanReason::Dependency(phases) => format!("{phases} dependency"),
    };
    let mut flags = Vec::new();
    if entry.build_only {
      flags.push("build-only");
    }
    if entry.test_only {
      flags.push("test-only");
    }
    let flags = if flags.is_empty() {
      String::new()
    } else {
      format!(" [{}]", flags.join(", "))
    };

    println!(
      "  {:>3}. {} {} {}{}",
      i + 1,
      entry.name(),
      entry.recipe.build_identity(),
      format!("({reason})").if_supports_color(Stream::Stdout, |s| s.dimmed()),
      flags
    );

    if global.verbose && !entry.depends_on.is_empty() {
      println!("       {} {}", symbols::ARROW, entry.depends_on.join(", "));
    }
  }

  if !plan.satisfied().is_empty() {
    println!();
    print_stat("Already installed", &plan.satisfied().join(", "));
  }

  Ok(())
}
