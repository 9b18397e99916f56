// src/resolver/mod.rs

//! Dependency resolution and conflict detection
//!
//! Resolution walks the dependency closure of the requested roots depth
//! first, selecting one version per recipe name:
//! - The first edge to reach a name selects the highest version that edge
//!   accepts
//! - Every later edge must accept the version already selected, otherwise
//!   resolution fails with a conflict naming both requirers
//! - Reaching a name that is still being expanded is a cycle
//!
//! There is no backtracking. A conflict is reported, never worked around;
//! the fix is to pin the dependency explicitly.

mod graph;

pub use graph::{DependencyEdge, DependencyGraph, GraphNode};

use crate::error::ResolutionError;
use crate::recipe::{DependencySpec, Recipe, RecipeLookup};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Requirer name used for roots in error messages
const ROOT_REQUIRER: &str = "<root>";

struct Selection {
    recipe: Arc<Recipe>,
    /// The edge that selected this version
    requirer: String,
    constraint: String,
    /// Set once every dependency has been expanded
    depth: Option<usize>,
}

struct Resolver<'a, L: RecipeLookup + ?Sized> {
    lookup: &'a L,
    selected: HashMap<String, Selection>,
    /// Names currently being expanded, outermost first
    stack: Vec<String>,
    graph: DependencyGraph,
}

/// Resolve the dependency closure of `roots` into an acyclic graph
pub fn resolve<L: RecipeLookup + ?Sized>(
    roots: &[DependencySpec],
    lookup: &L,
) -> Result<DependencyGraph, ResolutionError> {
    let mut resolver = Resolver {
        lookup,
        selected: HashMap::new(),
        stack: Vec::new(),
        graph: DependencyGraph::new(),
    };

    for root in roots {
        resolver.visit(root, ROOT_REQUIRER)?;
        resolver.graph.add_root(&root.name);
    }

    info!(
        "Resolved {} recipes from {} roots ({} edges)",
        resolver.graph.len(),
        roots.len(),
        resolver.graph.edges().count()
    );

    Ok(resolver.graph)
}

impl<L: RecipeLookup + ?Sized> Resolver<'_, L> {
    /// Expand one edge and return the depth of its target
    fn visit(&mut self, spec: &DependencySpec, requirer: &str) -> Result<usize, ResolutionError> {
        if let Some(pos) = self.stack.iter().position(|n| *n == spec.name) {
            let mut cycle: Vec<String> = self.stack[pos..]
                .iter()
                .filter_map(|n| self.selected.get(n).map(|s| s.recipe.id.to_string()))
                .collect();
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            return Err(ResolutionError::CyclicDependency { cycle });
        }

        if let Some(existing) = self.selected.get(&spec.name) {
            if !spec.constraint.satisfies(existing.recipe.version()) {
                return Err(ResolutionError::VersionConflict {
                    name: spec.name.clone(),
                    constraints: vec![
                        (existing.requirer.clone(), existing.constraint.clone()),
                        (requirer.to_string(), spec.constraint.to_string()),
                    ],
                    available: self.lookup.available_versions(&spec.name),
                });
            }
            // Not on the stack, so fully expanded
            return Ok(existing.depth.unwrap_or(0));
        }

        let recipe = self.select(spec, requirer)?;
        debug!("Selected {} for {} (required by {})", recipe.id, spec, requirer);

        let name = spec.name.clone();
        let requirer_id = recipe.id.to_string();
        self.selected.insert(
            name.clone(),
            Selection {
                recipe: Arc::clone(&recipe),
                requirer: requirer.to_string(),
                constraint: spec.constraint.to_string(),
                depth: None,
            },
        );
        self.graph.add_node(Arc::clone(&recipe));
        self.stack.push(name.clone());

        let mut depth = 0;
        for dep in &recipe.dependencies {
            let dep_depth = self.visit(dep, &requirer_id)?;
            depth = depth.max(dep_depth + 1);
            self.graph.add_edge(DependencyEdge {
                from: name.clone(),
                to: dep.name.clone(),
                constraint: dep.constraint.clone(),
            });
        }

        self.stack.pop();
        self.graph.set_depth(&name, depth);
        if let Some(selection) = self.selected.get_mut(&name) {
            selection.depth = Some(depth);
        }

        Ok(depth)
    }

    /// Pick the highest candidate the edge accepts
    fn select(&self, spec: &DependencySpec, requirer: &str) -> Result<Arc<Recipe>, ResolutionError> {
        let candidates = self.lookup.candidates(&spec.name);
        if candidates.is_empty() {
            return Err(ResolutionError::MissingRecipe {
                name: spec.name.clone(),
                required_by: requirer.to_string(),
            });
        }

        candidates
            .iter()
            .rev()
            .find(|r| spec.constraint.satisfies(r.version()))
            .cloned()
            .ok_or_else(|| ResolutionError::VersionConflict {
                name: spec.name.clone(),
                constraints: vec![(requirer.to_string(), spec.constraint.to_string())],
                available: candidates.iter().map(|r| r.version().to_string()).collect(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{parse_recipe, RecipeStore};

    fn store(recipes: &[(&str, &str, &[&str])]) -> RecipeStore {
        let mut store = RecipeStore::new();
        for (name, version, deps) in recipes {
            let requires = deps
                .iter()
                .map(|d| format!("\"{}\"", d))
                .collect::<Vec<_>>()
                .join(", ");
            let recipe = parse_recipe(&format!(
                "[package]\nname = \"{name}\"\nversion = \"{version}\"\n[build]\nrequires = [{requires}]\n"
            ))
            .unwrap();
            store.insert(recipe).unwrap();
        }
        store
    }

    fn roots(specs: &[&str]) -> Vec<DependencySpec> {
        specs.iter().map(|s| DependencySpec::parse(s).unwrap()).collect()
    }

    #[test]
    fn test_resolve_chain_depths() {
        let store = store(&[("a", "1.0", &[]), ("b", "1.0", &["a"]), ("c", "1.0", &["b", "a"])]);
        let graph = resolve(&roots(&["c"]), &store).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.node("a").unwrap().depth, 0);
        assert_eq!(graph.node("b").unwrap().depth, 1);
        assert_eq!(graph.node("c").unwrap().depth, 2);
        assert_eq!(graph.edges().count(), 3);
        assert!(graph.is_root("c"));
    }

    #[test]
    fn test_selects_highest_matching_version() {
        let store = store(&[
            ("zlib", "1.2.13", &[]),
            ("zlib", "1.3.1", &[]),
            ("app", "1.0", &["zlib < 1.3"]),
        ]);
        let graph = resolve(&roots(&["app"]), &store).unwrap();
        assert_eq!(graph.node("zlib").unwrap().id().to_string(), "zlib@1.2.13");

        let graph = resolve(&roots(&["zlib"]), &store).unwrap();
        assert_eq!(graph.node("zlib").unwrap().id().to_string(), "zlib@1.3.1");
    }

    #[test]
    fn test_cycle_detected() {
        let store = store(&[("a", "1", &["b"]), ("b", "1", &["a"])]);
        match resolve(&roots(&["a"]), &store).unwrap_err() {
            ResolutionError::CyclicDependency { cycle } => {
                assert_eq!(cycle, vec!["a@1", "b@1", "a@1"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_longer_cycle_excludes_prefix() {
        let store = store(&[
            ("top", "1", &["x"]),
            ("x", "1", &["y"]),
            ("y", "1", &["z"]),
            ("z", "1", &["x"]),
        ]);
        match resolve(&roots(&["top"]), &store).unwrap_err() {
            ResolutionError::CyclicDependency { cycle } => {
                assert_eq!(cycle, vec!["x@1", "y@1", "z@1", "x@1"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_recipe() {
        let store = store(&[("app", "1.0", &["ghost"])]);
        assert_eq!(
            resolve(&roots(&["app"]), &store).unwrap_err(),
            ResolutionError::MissingRecipe {
                name: "ghost".into(),
                required_by: "app@1.0".into(),
            }
        );

        assert!(matches!(
            resolve(&roots(&["nothing"]), &store).unwrap_err(),
            ResolutionError::MissingRecipe { ref required_by, .. } if required_by == "<root>"
        ));
    }

    #[test]
    fn test_version_conflict_names_both_requirers() {
        let store = store(&[
            ("zlib", "1.2.13", &[]),
            ("zlib", "1.3.1", &[]),
            ("old", "1.0", &["zlib < 1.3"]),
            ("new", "1.0", &["zlib >= 1.3"]),
            ("app", "1.0", &["old", "new"]),
        ]);
        match resolve(&roots(&["app"]), &store).unwrap_err() {
            ResolutionError::VersionConflict {
                name,
                constraints,
                available,
            } => {
                assert_eq!(name, "zlib");
                assert_eq!(constraints[0], ("old@1.0".to_string(), "< 1.3".to_string()));
                assert_eq!(constraints[1], ("new@1.0".to_string(), ">= 1.3".to_string()));
                assert_eq!(available, vec!["1.2.13", "1.3.1"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_candidate_satisfies() {
        let store = store(&[("zlib", "1.2", &[]), ("app", "1.0", &["zlib >= 2"])]);
        assert!(matches!(
            resolve(&roots(&["app"]), &store).unwrap_err(),
            ResolutionError::VersionConflict { ref constraints, .. } if constraints.len() == 1
        ));
    }

    #[test]
    fn test_shared_dependency_expanded_once() {
        let store = store(&[
            ("base", "1", &[]),
            ("left", "1", &["base"]),
            ("right", "1", &["base"]),
            ("app", "1", &["left", "right"]),
        ]);
        let graph = resolve(&roots(&["app", "base"]), &store).unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.edges().count(), 4);
        assert_eq!(graph.roots().count(), 2);
        assert_eq!(graph.dependents("base").len(), 2);
    }
}
