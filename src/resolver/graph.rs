// src/resolver/graph.rs

//! Resolved dependency graph
//!
//! Nodes are keyed by recipe name: resolution selects exactly one version
//! per name. Edges point from a recipe to the recipes it depends on. The
//! graph is acyclic by construction and read-only once resolution returns.

use crate::recipe::{Recipe, RecipeId};
use crate::version::VersionConstraint;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// A selected recipe and its position in build order
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub recipe: Arc<Recipe>,
    /// 0 for leaves, otherwise one more than the deepest dependency
    pub depth: usize,
}

impl GraphNode {
    #[inline]
    pub fn id(&self) -> &RecipeId {
        &self.recipe.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.recipe.name()
    }
}

/// A dependency edge with the constraint that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub constraint: VersionConstraint,
}

/// Acyclic dependency graph over selected recipes
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, GraphNode>,
    /// Outgoing edges in declaration order
    edges: BTreeMap<String, Vec<DependencyEdge>>,
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
    roots: Vec<String>,
}

impl DependencyGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_node(&mut self, recipe: Arc<Recipe>) {
        let name = recipe.name().to_string();
        self.edges.entry(name.clone()).or_default();
        self.reverse_edges.entry(name.clone()).or_default();
        self.nodes.insert(name, GraphNode { recipe, depth: 0 });
    }

    pub(crate) fn set_depth(&mut self, name: &str, depth: usize) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.depth = depth;
        }
    }

    /// Add `from -> to`; a repeated edge between the same pair is ignored
    pub(crate) fn add_edge(&mut self, edge: DependencyEdge) {
        let outgoing = self.edges.entry(edge.from.clone()).or_default();
        if outgoing.iter().any(|e| e.to == edge.to) {
            return;
        }
        self.reverse_edges
            .entry(edge.to.clone())
            .or_default()
            .insert(edge.from.clone());
        outgoing.push(edge);
    }

    pub(crate) fn add_root(&mut self, name: &str) {
        if !self.roots.iter().any(|r| r == name) {
            self.roots.push(name.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(name)
    }

    /// All nodes in name order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    /// Requested root recipes, in request order
    pub fn roots(&self) -> impl Iterator<Item = &GraphNode> {
        self.roots.iter().filter_map(|name| self.nodes.get(name))
    }

    pub fn is_root(&self, name: &str) -> bool {
        self.roots.iter().any(|r| r == name)
    }

    /// Every edge, grouped by source name
    pub fn edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.values().flatten()
    }

    /// Direct dependencies of a recipe, in declaration order
    pub fn dependencies(&self, name: &str) -> Vec<&GraphNode> {
        self.edges
            .get(name)
            .map(|edges| edges.iter().filter_map(|e| self.nodes.get(&e.to)).collect())
            .unwrap_or_default()
    }

    /// Recipes that directly depend on this one, in name order
    pub fn dependents(&self, name: &str) -> Vec<&GraphNode> {
        self.reverse_edges
            .get(name)
            .map(|names| names.iter().filter_map(|n| self.nodes.get(n)).collect())
            .unwrap_or_default()
    }

    /// Get all recipes that a given recipe transitively depends on
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        self.walk(name, |n| {
            self.edges
                .get(n)
                .map(|edges| edges.iter().map(|e| e.to.as_str()).collect())
                .unwrap_or_default()
        })
    }

    /// Get all recipes that transitively depend on a given recipe
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        self.walk(name, |n| {
            self.reverse_edges
                .get(n)
                .map(|names| names.iter().map(String::as_str).collect())
                .unwrap_or_default()
        })
    }

    fn walk<'a, F>(&'a self, start: &str, next: F) -> BTreeSet<String>
    where
        F: Fn(&str) -> Vec<&'a str>,
    {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = next(start).into();

        while let Some(name) = queue.pop_front() {
            if seen.insert(name.to_string()) {
                queue.extend(next(name).into_iter().filter(|n| !seen.contains(*n)));
            }
        }

        seen
    }

    /// Nodes in build order: depth first, then identifier
    ///
    /// Every node appears after all of its dependencies.
    pub fn topological_order(&self) -> Vec<&GraphNode> {
        let mut order: Vec<&GraphNode> = self.nodes.values().collect();
        order.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.id().cmp(b.id())));
        order
    }
}
