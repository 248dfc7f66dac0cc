//! Platform resolution: evaluating a recipe's conditional declarations
//! against one target platform.
//!
//! Resolution is a pure function of `(recipe, platform)`. Declarations whose
//! predicate does not match are dropped; an `on_macos`-style block that never
//! matches simply contributes nothing.

use semver::VersionReq;
use serde::Serialize;

use super::PlatformDescriptor;
use super::predicate::applies;
use crate::recipe::{BuildStep, EnvMutation, PhaseSet, Recipe};

/// A dependency that applies on the target platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDependency {
  pub name: String,
  /// Union of the phases of every matching declaration of this dependency.
  pub phases: PhaseSet,
  /// Version constraint; several declarations combine into one requirement
  /// that all of them must accept.
  pub constraint: Option<VersionReq>,
}

/// The dependencies of one recipe on one platform, in declaration order with
/// duplicate names merged at their first position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResolvedDependencySet {
  deps: Vec<ResolvedDependency>,
}

impl ResolvedDependencySet {
  pub fn iter(&self) -> impl Iterator<Item = &ResolvedDependency> {
    self.deps.iter()
  }

  pub fn get(&self, name: &str) -> Option<&ResolvedDependency> {
    self.deps.iter().find(|d| d.name == name)
  }

  pub fn len(&self) -> usize {
    self.deps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.deps.is_empty()
  }

  /// Dependencies needed at run time (and therefore linked into a receipt).
  pub fn runtime(&self) -> impl Iterator<Item = &ResolvedDependency> {
    self.deps.iter().filter(|d| d.phases.run)
  }

  fn add(&mut self, name: &str, phases: PhaseSet, constraint: Option<&VersionReq>) {
    if let Some(existing) = self.deps.iter_mut().find(|d| d.name == name) {
      existing.phases = existing.phases.union(phases);
      if let Some(req) = constraint {
        match &mut existing.constraint {
          Some(merged) => {
            for comparator in &req.comparators {
              if !merged.comparators.contains(comparator) {
                merged.comparators.push(comparator.clone());
              }
            }
          }
          None => existing.constraint = Some(req.clone()),
        }
      }
      return;
    }
    self.deps.push(ResolvedDependency {
      name: name.to_string(),
      phases,
      constraint: constraint.cloned(),
    });
  }
}

impl<'a> IntoIterator for &'a ResolvedDependencySet {
  type Item = &'a ResolvedDependency;
  type IntoIter = std::slice::Iter<'a, ResolvedDependency>;

  fn into_iter(self) -> Self::IntoIter {
    self.deps.iter()
  }
}

/// Resolve a recipe's dependency declarations for `platform`.
pub fn resolve(recipe: &Recipe, platform: &PlatformDescriptor) -> ResolvedDependencySet {
  let mut set = ResolvedDependencySet::default();
  for dep in recipe.dependencies_for_platform(platform) {
    set.add(&dep.name, dep.phase.stages(), dep.version.as_ref());
  }
  set
}

/// Environment mutations and steps that apply on one platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepSchedule {
  pub env: Vec<EnvMutation>,
  pub build: Vec<BuildStep>,
  pub install: Vec<BuildStep>,
  /// `None` when the recipe declares no test block.
  pub test: Option<Vec<BuildStep>>,
}

/// Filter a recipe's env mutations and steps for `platform`, keeping order.
pub fn resolve_steps(recipe: &Recipe, platform: &PlatformDescriptor) -> StepSchedule {
  let steps = |list: &[BuildStep]| -> Vec<BuildStep> {
    list
      .iter()
      .filter(|s| applies(s.platform.as_ref(), platform))
      .cloned()
      .collect()
  };

  StepSchedule {
    env: recipe
      .env
      .iter()
      .filter(|m| applies(m.platform.as_ref(), platform))
      .cloned()
      .collect(),
    build: steps(&recipe.build),
    install: steps(&recipe.install),
    test: recipe.test.as_deref().map(steps),
  }
}
