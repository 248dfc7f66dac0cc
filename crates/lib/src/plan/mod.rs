//! Install planning: a deterministic topological order over the graph.
//!
//! Ordering is Kahn's algorithm over dependency edges, always picking the
//! ready node that comes first in declaration order. Already-satisfied nodes
//! are processed (they release their dependents) but do not appear in the plan.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::Serialize;
use tracing::{debug, info};

use crate::graph::DependencyGraph;
use crate::platform::ResolvedDependencySet;
use crate::recipe::{PhaseSet, Recipe};

/// Why an entry is in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "phases")]
pub enum PlanReason {
  /// Requested explicitly.
  Target,
  /// Pulled in by dependents needing it for these phases.
  Dependency(PhaseSet),
}

impl fmt::Display for PlanReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Target => write!(f, "target"),
      Self::Dependency(phases) => write!(f, "{phases}"),
    }
  }
}

/// One recipe to install.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
  #[serde(serialize_with = "serialize_recipe_name", rename = "name")]
  pub recipe: Arc<Recipe>,
  pub reason: PlanReason,
  /// Needed only to build its dependents; nothing links to it at run time.
  pub build_only: bool,
  /// Needed only to test its dependents.
  pub test_only: bool,
  /// Direct dependencies that are themselves in the plan.
  pub depends_on: Vec<String>,
  /// Every resolved dependency with its phases, planned or satisfied.
  #[serde(skip)]
  pub dependencies: ResolvedDependencySet,
}

fn serialize_recipe_name<S: serde::Serializer>(recipe: &Arc<Recipe>, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_str(&recipe.name)
}

impl PlanEntry {
  pub fn name(&self) -> &str {
    &self.recipe.name
  }
}

/// An ordered install plan. Every dependency precedes its dependents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
  entries: Vec<PlanEntry>,
  /// Nodes excluded because they were already satisfied.
  satisfied: Vec<String>,
}

impl Plan {
  pub fn entries(&self) -> &[PlanEntry] {
    &self.entries
  }

  pub fn satisfied(&self) -> &[String] {
    &self.satisfied
  }

  pub fn names(&self) -> Vec<&str> {
    self.entries.iter().map(PlanEntry::name).collect()
  }

  pub fn get(&self, name: &str) -> Option<&PlanEntry> {
    self.entries.iter().find(|e| e.name() == name)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Every planned entry that depends, directly or transitively, on `name`.
  pub fn descendants(&self, name: &str) -> HashSet<String> {
    let mut found: HashSet<String> = HashSet::new();
    let mut frontier = vec![name.to_string()];
    while let Some(current) = frontier.pop() {
      for entry in &self.entries {
        if entry.depends_on.contains(&current) && found.insert(entry.name().to_string()) {
          frontier.push(entry.name().to_string());
        }
      }
    }
    found
  }

  /// Remove `failed` and everything that depends on it, keeping the relative
  /// order of what remains.
  pub fn without_failed(&self, failed: &str) -> Plan {
    let mut removed = self.descendants(failed);
    removed.insert(failed.to_string());

    Plan {
      entries: self
        .entries
        .iter()
        .filter(|e| !removed.contains(e.name()))
        .cloned()
        .collect(),
      satisfied: self.satisfied.clone(),
    }
  }
}

/// Compute the install order for a graph.
///
/// Nodes named in `already_satisfied` are left out of the plan but still count
/// as available for their dependents. Only nodes reachable from an unsatisfied
/// requested node through unsatisfied nodes are planned: the dependencies of
/// something already installed are not rebuilt.
pub fn plan(graph: &DependencyGraph, already_satisfied: &HashSet<String>) -> Plan {
  let inner = graph.inner();
  let needed = needed_nodes(graph, already_satisfied);

  // Outgoing edges point at dependencies: a node is ready once all of them are placed.
  let mut pending: HashMap<NodeIndex, usize> = inner
    .node_indices()
    .map(|idx| (idx, inner.neighbors_directed(idx, Direction::Outgoing).count()))
    .collect();

  let mut ready: BTreeSet<(usize, usize)> = pending
    .iter()
    .filter(|(_, count)| **count == 0)
    .map(|(idx, _)| (inner[*idx].declaration_index, idx.index()))
    .collect();

  let mut result = Plan::default();

  while let Some((_, raw)) = ready.pop_first() {
    let idx = NodeIndex::new(raw);
    let node = &inner[idx];

    if already_satisfied.contains(node.name()) {
      debug!(name = %node.name(), "already satisfied");
      result.satisfied.push(node.name().to_string());
    } else if !needed.contains(&idx) {
      debug!(name = %node.name(), "not needed by any unsatisfied target");
    } else {
      let incoming = inner
        .edges_directed(idx, Direction::Incoming)
        .filter(|edge| needed.contains(&edge.source()))
        .fold(PhaseSet::EMPTY, |acc, edge| acc.union(*edge.weight()));

      let reason = if node.requested {
        PlanReason::Target
      } else {
        PlanReason::Dependency(incoming)
      };

      let depends_on = graph
        .dependencies_of(node.name())
        .into_iter()
        .filter(|(dep, _)| !already_satisfied.contains(*dep))
        .map(|(dep, _)| dep.to_string())
        .collect();

      result.entries.push(PlanEntry {
        recipe: Arc::clone(&node.recipe),
        reason,
        build_only: !node.requested && incoming.is_build_only(),
        test_only: !node.requested && incoming.is_test_only(),
        depends_on,
        dependencies: node.dependencies.clone(),
      });
    }

    for dependent in inner.neighbors_directed(idx, Direction::Incoming) {
      if let Some(count) = pending.get_mut(&dependent) {
        *count = count.saturating_sub(1);
        if *count == 0 {
          ready.insert((inner[dependent].declaration_index, dependent.index()));
        }
      }
    }
  }

  info!(
    planned = result.entries.len(),
    satisfied = result.satisfied.len(),
    "install plan computed"
  );
  result
}

/// Unsatisfied nodes reachable from an unsatisfied requested node without
/// passing through a satisfied one.
fn needed_nodes(graph: &DependencyGraph, already_satisfied: &HashSet<String>) -> HashSet<NodeIndex> {
  let inner = graph.inner();
  let mut needed = HashSet::new();
  let mut stack: Vec<NodeIndex> = inner
    .node_indices()
    .filter(|idx| inner[*idx].requested && !already_satisfied.contains(inner[*idx].name()))
    .collect();

  while let Some(idx) = stack.pop() {
    if !needed.insert(idx) {
      continue;
    }
    for dep in inner.neighbors_directed(idx, Direction::Outgoing) {
      if !already_satisfied.contains(inner[dep].name()) {
        stack.push(dep);
      }
    }
  }
  needed
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::recipe::{Phase, RecipeSet};
  use crate::util::testutil::{RecipeBuilder, linux};

  fn graph_for(recipes: Vec<Recipe>, targets: &[&str]) -> DependencyGraph {
    let set = RecipeSet::from_recipes(recipes).unwrap();
    let targets: Vec<String> = targets.iter().map(|s| s.to_string()).collect();
    DependencyGraph::build(&set, &targets, &linux()).unwrap()
  }

  fn xyz() -> DependencyGraph {
    graph_for(
      vec![
        RecipeBuilder::new("x").dep("y", Phase::Run).build(),
        RecipeBuilder::new("y").dep("z", Phase::Build).build(),
        RecipeBuilder::new("z").build(),
      ],
      &["x"],
    )
  }

  /// A diamond with extra independent leaves, declared in a shuffled order.
  fn diamond() -> DependencyGraph {
    graph_for(
      vec![
        RecipeBuilder::new("app")
          .dep("gui", Phase::Run)
          .dep("net", Phase::Run)
          .dep("meson", Phase::Build)
          .build(),
        RecipeBuilder::new("zlib").build(),
        RecipeBuilder::new("gui").dep("core", Phase::Run).build(),
        RecipeBuilder::new("meson").dep("python", Phase::Run).build(),
        RecipeBuilder::new("net").dep("core", Phase::Run).dep("zlib", Phase::Run).build(),
        RecipeBuilder::new("core").dep("zlib", Phase::Run).build(),
        RecipeBuilder::new("python").dep("zlib", Phase::Run).build(),
      ],
      &["app"],
    )
  }

  fn assert_dependencies_first(graph: &DependencyGraph, plan: &Plan) {
    let position: HashMap<&str, usize> = plan.names().into_iter().enumerate().map(|(i, n)| (n, i)).collect();
    for entry in plan.entries() {
      for (dep, _) in graph.dependencies_of(entry.name()) {
        if let Some(&dep_pos) = position.get(dep) {
          assert!(dep_pos < position[entry.name()], "{dep} must precede {}", entry.name());
        }
      }
    }
  }

  #[test]
  fn xyz_orders_leaf_first() {
    let graph = xyz();
    let plan = plan(&graph, &HashSet::new());
    assert_eq!(plan.names(), vec!["z", "y", "x"]);

    let z = plan.get("z").unwrap();
    assert!(z.build_only);
    assert_eq!(z.reason, PlanReason::Dependency(PhaseSet::BUILD));
    assert_eq!(plan.get("x").unwrap().reason, PlanReason::Target);
    assert!(!plan.get("y").unwrap().build_only);
  }

  #[test]
  fn ties_break_by_declaration_order() {
    let graph = diamond();
    let plan = plan(&graph, &HashSet::new());
    assert_eq!(
      plan.names(),
      vec!["zlib", "core", "gui", "net", "python", "meson", "app"]
    );
    assert_dependencies_first(&graph, &plan);
  }

  #[test]
  fn plan_is_deterministic() {
    let graph = diamond();
    let first = plan(&graph, &HashSet::new()).names().join(",");
    for _ in 0..10 {
      assert_eq!(plan(&graph, &HashSet::new()).names().join(","), first);
    }
  }

  #[test]
  fn satisfied_nodes_are_excluded_without_reordering() {
    let graph = diamond();
    let full = plan(&graph, &HashSet::new());

    let satisfied: HashSet<String> = ["core".to_string(), "python".to_string()].into();
    let partial = plan(&graph, &satisfied);

    let expected: Vec<&str> = full
      .names()
      .into_iter()
      .filter(|n| !satisfied.contains(*n))
      .collect();
    assert_eq!(partial.names(), expected);
    assert_eq!(partial.satisfied(), &["core".to_string(), "python".to_string()]);
    assert!(!partial.get("gui").unwrap().depends_on.contains(&"core".to_string()));
    assert_dependencies_first(&graph, &partial);
  }

  #[test]
  fn satisfied_nodes_shield_their_dependencies() {
    let graph = diamond();

    let satisfied: HashSet<String> = ["meson".to_string()].into();
    let partial = plan(&graph, &satisfied);
    assert_eq!(partial.names(), vec!["zlib", "core", "gui", "net", "app"]);
    assert!(partial.get("python").is_none());

    let satisfied: HashSet<String> = ["app".to_string()].into();
    let partial = plan(&graph, &satisfied);
    assert!(partial.is_empty());
    assert_eq!(partial.satisfied(), &["app".to_string()]);
  }

  #[test]
  fn phases_count_only_planned_dependents() {
    let graph = graph_for(
      vec![
        RecipeBuilder::new("mpv").dep("meson", Phase::Build).build(),
        RecipeBuilder::new("docs").dep("meson", Phase::Run).build(),
        RecipeBuilder::new("meson").build(),
      ],
      &["mpv", "docs"],
    );
    let satisfied: HashSet<String> = ["docs".to_string()].into();
    let plan = plan(&graph, &satisfied);
    assert_eq!(plan.names(), vec!["meson", "mpv"]);
    let meson = plan.get("meson").unwrap();
    assert_eq!(meson.reason, PlanReason::Dependency(PhaseSet::BUILD));
    assert!(meson.build_only);
  }

  #[test]
  fn build_and_test_only_flags() {
    let graph = graph_for(
      vec![
        RecipeBuilder::new("mpv")
          .dep("meson", Phase::Build)
          .dep("pkgconf", Phase::BuildTest)
          .dep("check", Phase::Test)
          .dep("ffmpeg", Phase::Run)
          .build(),
        RecipeBuilder::new("meson").build(),
        RecipeBuilder::new("pkgconf").build(),
        RecipeBuilder::new("check").build(),
        RecipeBuilder::new("ffmpeg").dep("pkgconf", Phase::Build).build(),
      ],
      &["mpv"],
    );
    let plan = plan(&graph, &HashSet::new());

    assert!(plan.get("meson").unwrap().build_only);
    assert!(plan.get("check").unwrap().test_only);
    let pkgconf = plan.get("pkgconf").unwrap();
    assert!(!pkgconf.build_only && !pkgconf.test_only);
    assert!(!plan.get("ffmpeg").unwrap().build_only);
  }

  #[test]
  fn without_failed_drops_descendants_only() {
    let graph = diamond();
    let plan = plan(&graph, &HashSet::new());

    let pruned = plan.without_failed("core");
    assert_eq!(pruned.names(), vec!["zlib", "python", "meson"]);

    let pruned = plan.without_failed("python");
    assert_eq!(pruned.names(), vec!["zlib", "core", "gui", "net"]);
  }

  #[test]
  fn descendants_are_transitive() {
    let plan = plan(&xyz(), &HashSet::new());
    let mut found: Vec<String> = plan.descendants("z").into_iter().collect();
    found.sort();
    assert_eq!(found, vec!["x".to_string(), "y".to_string()]);
    assert!(plan.descendants("x").is_empty());
  }
}
