// src/scheduler/task.rs

//! A unit of scheduled work

use crate::cache::Artifact;
use crate::hash::ContentHash;
use crate::recipe::{BuildOptions, Recipe, RecipeId};
use std::sync::Arc;

/// One recipe build, ready to run
///
/// Only created once every dependency has a committed artifact.
#[derive(Debug, Clone)]
pub struct BuildTask {
    pub recipe: Arc<Recipe>,
    pub options: BuildOptions,
    /// Content hash the output will be stored under
    pub hash: ContentHash,
    /// Committed artifacts of the direct dependencies, by recipe name
    pub dependencies: Vec<(String, Artifact)>,
    pub depth: usize,
}

impl BuildTask {
    #[inline]
    pub fn id(&self) -> &RecipeId {
        &self.recipe.id
    }

    /// Artifact of a direct dependency
    pub fn dependency(&self, name: &str) -> Option<&Artifact> {
        self.dependencies
            .iter()
            .find(|(dep, _)| dep == name)
            .map(|(_, artifact)| artifact)
    }
}
