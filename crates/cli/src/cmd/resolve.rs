//! Implementation of the `cellar resolve` command.
//!
//! Evaluates each recipe's platform conditionals and prints the dependencies
//! that apply, with their phases and version constraints.

use anyhow::Result;
use serde::Serialize;

use cellar_lib::graph::GraphError;
use cellar_lib::install::{ResolutionError, target_platform};
use cellar_lib::platform::{ResolvedDependencySet, resolve};

use super::{GlobalArgs, load_recipes};
use crate::output::{print_info, print_json, symbols};

#[derive(Serialize)]
struct ResolveOutput {
  platform: String,
  packages: Vec<ResolvedPackage>,
}

#[derive(Serialize)]
struct ResolvedPackage {
  name: String,
  version: String,
  dependencies: ResolvedDependencySet,
}

pub fn cmd_resolve(global: &GlobalArgs, packages: &[String]) -> Result<()> {
  let recipes = load_recipes(&global.recipes)?;
  let platform = target_platform(global.platform.as_deref())?;

  let names: Vec<String> = if packages.is_empty() {
    recipes.names().map(str::to_string).collect()
  } else {
    packages.to_vec()
  };

  let mut resolved = Vec::with_capacity(names.len());
  for name in names {
    let recipe = recipes
      .get(&name)
      .ok_or_else(|| ResolutionError::Graph(GraphError::UnknownTarget(name.clone())))?;
    resolved.push(ResolvedPackage {
      version: recipe.build_identity().to_string(),
      dependencies: resolve(recipe, &platform),
      name,
    });
  }

  if global.output.is_json() {
    return print_json(&ResolveOutput {
      platform: platform.triple(),
      packages: resolved,
    });
  }

  print_info(&format!("Resolving for {}", platform));
  for package in &resolved {
    println!();
    println!("{} {}", package.name, package.version);
    if package.dependencies.is_empty() {
      println!("  (no dependencies)");
      continue;
    }
    for dep in &package.dependencies {
      let constraint = dep
        .constraint
        .as_ref()
        .map(|req| format!(" {req}"))
        .unwrap_or_default();
      println!("  {} {}{} ({})", symbols::ARROW, dep.name, constraint, dep.phases);
    }
  }

  Ok(())
}
