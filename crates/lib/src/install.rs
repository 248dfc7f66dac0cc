//! The install pipeline: recipes and targets in, graph and plan out, then
//! optional execution.
//!
//! Every structural problem (bad recipe, cycle, conflict, unresolved
//! dependency) surfaces as a [`ResolutionError`] before anything runs.

use std::collections::HashSet;

use thiserror::Error;
use tracing::info;

use crate::execute::{ExecuteConfig, ExecutionReport, Executor};
use crate::graph::{DependencyGraph, GraphError};
use crate::plan::{Plan, plan};
use crate::platform::{PlatformDescriptor, PlatformParseError};
use crate::receipt::{ReceiptError, ReceiptStore};
use crate::recipe::{RecipeError, RecipeSet};

/// Errors that abort an install before execution.
#[derive(Debug, Error)]
pub enum ResolutionError {
  #[error(transparent)]
  Recipe(#[from] RecipeError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Receipt(#[from] ReceiptError),

  #[error("invalid platform: {0}")]
  Platform(#[from] PlatformParseError),
}

/// A resolved install: the full graph and the plan derived from it.
#[derive(Debug)]
pub struct Resolution {
  pub graph: DependencyGraph,
  pub plan: Plan,
}

/// The platform to resolve for: `spec` if given (`<os>-<version>-<arch>`),
/// otherwise the running host.
pub fn target_platform(spec: Option<&str>) -> Result<PlatformDescriptor, ResolutionError> {
  Ok(match spec {
    Some(spec) => spec.parse()?,
    None => PlatformDescriptor::current()?,
  })
}

/// Build the graph for `targets` and plan it.
///
/// With a receipt store, packages already installed at an equal or newer
/// build identity are left out of the plan, and nodes conflicting with
/// installed packages are rejected.
pub fn prepare_install(
  recipes: &RecipeSet,
  targets: &[String],
  platform: &PlatformDescriptor,
  receipts: Option<&ReceiptStore>,
) -> Result<Resolution, ResolutionError> {
  let graph = DependencyGraph::build(recipes, targets, platform)?;

  let satisfied = match receipts {
    Some(store) => {
      let installed = store.installed_names()?;
      graph.check_installed_conflicts(recipes, &installed)?;
      store.satisfied(recipes)?
    }
    None => HashSet::new(),
  };

  let plan = plan(&graph, &satisfied);
  info!(
    nodes = graph.len(),
    planned = plan.len(),
    satisfied = plan.satisfied().len(),
    platform = %platform,
    "install prepared"
  );

  Ok(Resolution { graph, plan })
}

/// Resolve and execute an install with real processes, recording receipts.
pub async fn install(
  recipes: &RecipeSet,
  targets: &[String],
  platform: &PlatformDescriptor,
  config: ExecuteConfig,
  receipts: ReceiptStore,
) -> Result<(Resolution, ExecutionReport), ResolutionError> {
  let resolution = prepare_install(recipes, targets, platform, Some(&receipts))?;
  let report = Executor::with_processes(config)
    .with_receipts(receipts)
    .execute(&resolution.plan, platform)
    .await;
  Ok((resolution, report))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::receipt::Receipt;
  use crate::recipe::Phase;
  use crate::util::testutil::{RecipeBuilder, linux};
  use std::path::Path;
  use tempfile::TempDir;

  fn recipes() -> RecipeSet {
    RecipeSet::from_recipes(vec![
      RecipeBuilder::new("mpv")
        .dep("ffmpeg", Phase::Run)
        .dep("meson", Phase::Build)
        .build(),
      RecipeBuilder::new("ffmpeg").version("7.1.0").build(),
      RecipeBuilder::new("meson").build(),
      RecipeBuilder::new("mplayer").conflict("mpv", "both install bin/mplayer-compat").build(),
    ])
    .unwrap()
  }

  fn targets(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  fn installed(store: &ReceiptStore, recipes: &RecipeSet, name: &str) {
    let recipe = recipes.get(name).unwrap();
    store
      .record(&Receipt::new(recipe, &linux().triple(), Path::new("/cellar"), true))
      .unwrap();
  }

  #[test]
  fn prepares_full_plan_without_receipts() {
    let resolution = prepare_install(&recipes(), &targets(&["mpv"]), &linux(), None).unwrap();
    assert_eq!(resolution.plan.names(), vec!["ffmpeg", "meson", "mpv"]);
    assert_eq!(resolution.graph.len(), 3);
  }

  #[test]
  fn installed_packages_are_satisfied() {
    let dir = TempDir::new().unwrap();
    let store = ReceiptStore::new(dir.path());
    let recipes = recipes();
    installed(&store, &recipes, "ffmpeg");

    let resolution = prepare_install(&recipes, &targets(&["mpv"]), &linux(), Some(&store)).unwrap();
    assert_eq!(resolution.plan.names(), vec!["meson", "mpv"]);
    assert_eq!(resolution.plan.satisfied(), &["ffmpeg".to_string()]);
  }

  #[test]
  fn installed_target_does_not_rebuild_its_build_dependencies() {
    let dir = TempDir::new().unwrap();
    let store = ReceiptStore::new(dir.path());
    let recipes = recipes();
    installed(&store, &recipes, "mpv");

    let resolution = prepare_install(&recipes, &targets(&["mpv"]), &linux(), Some(&store)).unwrap();
    assert!(resolution.plan.is_empty(), "{:?}", resolution.plan.names());
    assert_eq!(resolution.plan.satisfied(), &["mpv".to_string()]);
  }

  #[test]
  fn outdated_install_is_planned_again() {
    let dir = TempDir::new().unwrap();
    let store = ReceiptStore::new(dir.path());
    let old = RecipeBuilder::new("ffmpeg").version("6.0.0").build();
    store
      .record(&Receipt::new(&old, &linux().triple(), Path::new("/cellar"), false))
      .unwrap();

    let resolution = prepare_install(&recipes(), &targets(&["mpv"]), &linux(), Some(&store)).unwrap();
    assert!(resolution.plan.names().contains(&"ffmpeg"));
  }

  #[test]
  fn conflict_with_installed_package_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = ReceiptStore::new(dir.path());
    let recipes = recipes();
    installed(&store, &recipes, "mplayer");

    let err = prepare_install(&recipes, &targets(&["mpv"]), &linux(), Some(&store)).unwrap_err();
    assert!(matches!(
      err,
      ResolutionError::Graph(GraphError::Conflict { ref package, ref conflicts_with, .. })
        if package == "mpv" && conflicts_with == "mplayer"
    ));
  }

  #[test]
  fn unknown_target_is_a_resolution_error() {
    let err = prepare_install(&recipes(), &targets(&["vlc"]), &linux(), None).unwrap_err();
    assert!(matches!(err, ResolutionError::Graph(GraphError::UnknownTarget(_))));
  }

  #[test]
  fn platform_override_parses() {
    let platform = target_platform(Some("linux-6-x86_64")).unwrap();
    assert_eq!(platform, linux());
    assert!(matches!(
      target_platform(Some("plan9-1-mips")),
      Err(ResolutionError::Platform(_))
    ));
  }
}
