//! Dependency graph over the recipes reachable from a set of targets.
//!
//! Nodes are recipes; edges run from a dependent to each of its resolved
//! dependencies and carry the phases the dependency is needed for. The graph
//! is validated on construction: every dependency must name a known recipe
//! whose version satisfies the declared constraint, there must be no cycle,
//! and no two nodes may conflict.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use thiserror::Error;
use tracing::{debug, info};

use crate::platform::{PlatformDescriptor, ResolvedDependencySet, resolve};
use crate::recipe::{PhaseSet, Recipe, RecipeSet};
use crate::version;

/// Structural errors that abort a run before anything executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("dependency cycle: {}", .path.join(" -> "))]
  Cycle { path: Vec<String> },

  #[error("{package} conflicts with {conflicts_with}: {because}")]
  Conflict {
    package: String,
    conflicts_with: String,
    because: String,
  },

  #[error("{package} depends on '{dependency}', which cannot be resolved: {reason}")]
  Unresolved {
    package: String,
    dependency: String,
    reason: String,
  },

  #[error("no recipe named '{0}'")]
  UnknownTarget(String),
}

/// A recipe in the graph together with its platform-resolved dependencies.
#[derive(Debug, Clone)]
pub struct GraphNode {
  pub recipe: Arc<Recipe>,
  /// Position of the recipe in the universe's declaration order.
  pub declaration_index: usize,
  /// Whether the recipe was named explicitly (or implicitly, when no target was given).
  pub requested: bool,
  pub dependencies: ResolvedDependencySet,
}

impl GraphNode {
  pub fn name(&self) -> &str {
    &self.recipe.name
  }
}

/// A validated, acyclic dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
  graph: DiGraph<GraphNode, PhaseSet>,
  nodes: HashMap<String, NodeIndex>,
  platform: PlatformDescriptor,
}

impl DependencyGraph {
  /// Build the graph for `targets` (every recipe when `targets` is empty).
  ///
  /// # Errors
  ///
  /// `UnknownTarget` for a target with no recipe, `Unresolved` for a missing or
  /// version-incompatible dependency, `Cycle` with the full cycle path, and
  /// `Conflict` when two nodes exclude each other.
  pub fn build(recipes: &RecipeSet, targets: &[String], platform: &PlatformDescriptor) -> Result<Self, GraphError> {
    let roots: Vec<String> = if targets.is_empty() {
      recipes.names().map(str::to_string).collect()
    } else {
      targets.to_vec()
    };

    let mut dag = Self {
      graph: DiGraph::new(),
      nodes: HashMap::new(),
      platform: *platform,
    };

    let mut queue = VecDeque::new();
    for root in &roots {
      let recipe = recipes
        .get(root)
        .ok_or_else(|| GraphError::UnknownTarget(root.clone()))?;
      let idx = dag.insert_node(recipes, recipe);
      dag.graph[idx].requested = true;
      queue.push_back(idx);
    }

    // Closure in breadth-first discovery order.
    let mut expanded = HashSet::new();
    while let Some(idx) = queue.pop_front() {
      if !expanded.insert(idx) {
        continue;
      }

      let dependent = dag.graph[idx].name().to_string();
      let deps: Vec<_> = dag.graph[idx].dependencies.iter().cloned().collect();
      for dep in deps {
        let recipe = recipes.get(&dep.name).ok_or_else(|| GraphError::Unresolved {
          package: dependent.clone(),
          dependency: dep.name.clone(),
          reason: "no recipe provides it".to_string(),
        })?;

        if let Some(req) = &dep.constraint
          && !version::satisfies(&recipe.version, req)
        {
          return Err(GraphError::Unresolved {
            package: dependent,
            dependency: dep.name,
            reason: format!("version {} does not satisfy {req}", recipe.version),
          });
        }

        let dep_idx = dag.insert_node(recipes, recipe);
        dag.graph.add_edge(idx, dep_idx, dep.phases);
        queue.push_back(dep_idx);
      }
    }

    if let Some(path) = dag.find_cycle() {
      return Err(GraphError::Cycle { path });
    }
    dag.check_conflicts()?;

    info!(
      nodes = dag.graph.node_count(),
      edges = dag.graph.edge_count(),
      platform = %platform,
      "dependency graph built"
    );
    Ok(dag)
  }

  fn insert_node(&mut self, recipes: &RecipeSet, recipe: &Arc<Recipe>) -> NodeIndex {
    if let Some(&idx) = self.nodes.get(&recipe.name) {
      return idx;
    }
    let dependencies = resolve(recipe, &self.platform);
    debug!(name = %recipe.name, deps = dependencies.len(), "adding graph node");
    let idx = self.graph.add_node(GraphNode {
      recipe: Arc::clone(recipe),
      declaration_index: recipes.position(&recipe.name).unwrap_or(usize::MAX),
      requested: false,
      dependencies,
    });
    self.nodes.insert(recipe.name.clone(), idx);
    idx
  }

  /// Three-colour depth-first search. Returns the first cycle found, starting
  /// and ending at the same node.
  fn find_cycle(&self) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Colour {
      White,
      Grey,
      Black,
    }

    let mut colour = vec![Colour::White; self.graph.node_count()];

    for start in self.indices_in_declaration_order() {
      if colour[start.index()] != Colour::White {
        continue;
      }

      colour[start.index()] = Colour::Grey;
      let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = vec![(start, self.ordered_dependencies(start), 0)];

      loop {
        let Some(top) = stack.last_mut() else {
          break;
        };
        let node = top.0;
        let next = top.1.get(top.2).copied();
        top.2 += 1;

        let Some(next) = next else {
          colour[node.index()] = Colour::Black;
          stack.pop();
          continue;
        };

        match colour[next.index()] {
          Colour::White => {
            colour[next.index()] = Colour::Grey;
            stack.push((next, self.ordered_dependencies(next), 0));
          }
          Colour::Grey => {
            let from = stack.iter().position(|(n, _, _)| *n == next).unwrap_or(0);
            let mut path: Vec<String> = stack[from..]
              .iter()
              .map(|(n, _, _)| self.graph[*n].name().to_string())
              .collect();
            path.push(self.graph[next].name().to_string());
            return Some(path);
          }
          Colour::Black => {}
        }
      }
    }

    None
  }

  fn check_conflicts(&self) -> Result<(), GraphError> {
    for idx in self.indices_in_declaration_order() {
      let recipe = &self.graph[idx].recipe;
      for conflict in &recipe.conflicts {
        if self.nodes.contains_key(&conflict.name) {
          return Err(GraphError::Conflict {
            package: recipe.name.clone(),
            conflicts_with: conflict.name.clone(),
            because: conflict.because.clone(),
          });
        }
      }
    }
    Ok(())
  }

  /// Reject nodes that conflict with an installed package, in either direction.
  ///
  /// Installed nodes are not checked against each other; they already coexist.
  pub fn check_installed_conflicts(&self, recipes: &RecipeSet, installed: &HashSet<String>) -> Result<(), GraphError> {
    for idx in self.indices_in_declaration_order() {
      let node = &self.graph[idx];
      if installed.contains(node.name()) {
        continue;
      }

      for conflict in &node.recipe.conflicts {
        if installed.contains(&conflict.name) {
          return Err(GraphError::Conflict {
            package: node.name().to_string(),
            conflicts_with: conflict.name.clone(),
            because: format!("{} (already installed)", conflict.because),
          });
        }
      }

      let mut installed_sorted: Vec<&String> = installed.iter().collect();
      installed_sorted.sort();
      for other in installed_sorted {
        let Some(other_recipe) = recipes.get(other) else {
          continue;
        };
        if let Some(conflict) = other_recipe.conflicts.iter().find(|c| c.name == node.name()) {
          return Err(GraphError::Conflict {
            package: node.name().to_string(),
            conflicts_with: other.clone(),
            because: format!("{} (already installed)", conflict.because),
          });
        }
      }
    }
    Ok(())
  }

  fn indices_in_declaration_order(&self) -> Vec<NodeIndex> {
    let mut indices: Vec<NodeIndex> = self.graph.node_indices().collect();
    indices.sort_by_key(|&idx| (self.graph[idx].declaration_index, idx.index()));
    indices
  }

  /// Dependencies of a node in the order they were declared.
  fn ordered_dependencies(&self, idx: NodeIndex) -> Vec<NodeIndex> {
    self.graph[idx]
      .dependencies
      .iter()
      .filter_map(|dep| self.nodes.get(&dep.name).copied())
      .collect()
  }

  pub(crate) fn inner(&self) -> &DiGraph<GraphNode, PhaseSet> {
    &self.graph
  }

  pub(crate) fn index_of(&self, name: &str) -> Option<NodeIndex> {
    self.nodes.get(name).copied()
  }

  pub fn platform(&self) -> &PlatformDescriptor {
    &self.platform
  }

  pub fn node(&self, name: &str) -> Option<&GraphNode> {
    self.index_of(name).map(|idx| &self.graph[idx])
  }

  pub fn contains(&self, name: &str) -> bool {
    self.nodes.contains_key(name)
  }

  /// Nodes in declaration order.
  pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
    self.indices_in_declaration_order().into_iter().map(|idx| &self.graph[idx])
  }

  /// Direct dependencies of `name` with the phases each is needed for.
  pub fn dependencies_of(&self, name: &str) -> Vec<(&str, PhaseSet)> {
    self.edges(name, Direction::Outgoing)
  }

  /// Direct dependents of `name` with the phases they need it for.
  pub fn dependents_of(&self, name: &str) -> Vec<(&str, PhaseSet)> {
    self.edges(name, Direction::Incoming)
  }

  fn edges(&self, name: &str, direction: Direction) -> Vec<(&str, PhaseSet)> {
    let Some(idx) = self.index_of(name) else {
      return Vec::new();
    };

    let mut edges: Vec<(usize, &str, PhaseSet)> = self
      .graph
      .edges_directed(idx, direction)
      .map(|edge| {
        let other = match direction {
          Direction::Outgoing => edge.target(),
          Direction::Incoming => edge.source(),
        };
        let node = &self.graph[other];
        (node.declaration_index, node.name(), *edge.weight())
      })
      .collect();
    edges.sort_by_key(|(pos, name, _)| (*pos, *name));
    edges.into_iter().map(|(_, name, phases)| (name, phases)).collect()
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }
}
