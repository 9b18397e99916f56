// src/recipe/store.rs

//! In-memory set of loaded recipes
//!
//! Recipes are keyed by name, then by version, so that lookups by
//! constraint can walk candidates in version order.

use crate::error::ParseError;
use crate::recipe::format::{Recipe, RecipeId};
use crate::recipe::parser::parse_recipe_file;
use crate::version::PackageVersion;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Source of recipes for dependency resolution
pub trait RecipeLookup {
    /// All recipes with this name, lowest version first
    fn candidates(&self, name: &str) -> Vec<Arc<Recipe>>;

    /// Versions available for a name, lowest first
    fn available_versions(&self, name: &str) -> Vec<String> {
        self.candidates(name)
            .iter()
            .map(|r| r.version().to_string())
            .collect()
    }
}

/// Loaded recipes indexed by name and version
#[derive(Debug, Default, Clone)]
pub struct RecipeStore {
    recipes: BTreeMap<String, BTreeMap<PackageVersion, Arc<Recipe>>>,
}

impl RecipeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.toml` file in a directory (not recursive)
    ///
    /// Files are read in name order so error reporting is stable.
    pub fn load_dir(path: &Path) -> Result<Self, ParseError> {
        let io_err = |source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(path).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let file = entry.path();
            if file.is_file() && file.extension().is_some_and(|ext| ext == "toml") {
                files.push(file);
            }
        }
        files.sort();

        let mut store = Self::new();
        for file in &files {
            debug!("Loading recipe {}", file.display());
            store.insert_from(parse_recipe_file(file)?, &file.display().to_string())?;
        }

        info!("Loaded {} recipes from {}", store.len(), path.display());
        Ok(store)
    }

    /// Add a recipe; a second recipe with the same `name@version` is rejected
    pub fn insert(&mut self, recipe: Recipe) -> Result<(), ParseError> {
        let origin = recipe.id.to_string();
        self.insert_from(recipe, &origin)
    }

    fn insert_from(&mut self, recipe: Recipe, origin: &str) -> Result<(), ParseError> {
        let versions = self.recipes.entry(recipe.id.name.clone()).or_default();
        if let Some(existing) = versions.get(&recipe.id.version) {
            return Err(ParseError::malformed(
                origin,
                format!("duplicate recipe {} (already loaded as {})", recipe.id, existing.id),
            ));
        }
        versions.insert(recipe.id.version.clone(), Arc::new(recipe));
        Ok(())
    }

    pub fn get(&self, id: &RecipeId) -> Option<Arc<Recipe>> {
        self.recipes
            .get(&id.name)
            .and_then(|versions| versions.get(&id.version))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.recipes.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Every recipe, by name then version
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Recipe>> {
        self.recipes.values().flat_map(BTreeMap::values)
    }
}

impl RecipeLookup for RecipeStore {
    fn candidates(&self, name: &str) -> Vec<Arc<Recipe>> {
        self.recipes
            .get(name)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::parse_recipe;
    use tempfile::TempDir;

    fn recipe(name: &str, version: &str) -> Recipe {
        parse_recipe(&format!(
            "[package]\nname = \"{name}\"\nversion = \"{version}\"\n"
        ))
        .unwrap()
    }

    #[test]
    fn test_candidates_sorted_by_version() {
        let mut store = RecipeStore::new();
        store.insert(recipe("zlib", "1.3.1")).unwrap();
        store.insert(recipe("zlib", "1.2.13")).unwrap();
        store.insert(recipe("zlib", "1.3")).unwrap();

        assert_eq!(store.available_versions("zlib"), vec!["1.2.13", "1.3", "1.3.1"]);
        assert!(store.candidates("openssl").is_empty());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut store = RecipeStore::new();
        store.insert(recipe("zlib", "1.3")).unwrap();
        let err = store.insert(recipe("zlib", "1.3.0")).unwrap_err();
        assert!(matches!(err, ParseError::MalformedRecipe { .. }));
    }

    #[test]
    fn test_get() {
        let mut store = RecipeStore::new();
        store.insert(recipe("zlib", "1.3")).unwrap();
        let id = RecipeId::new("zlib", PackageVersion::parse("1.3").unwrap());
        assert!(store.get(&id).is_some());
        let missing = RecipeId::new("zlib", PackageVersion::parse("1.4").unwrap());
        assert!(store.get(&missing).is_none());
    }

    #[test]
    fn test_load_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("a.toml"),
            "[package]\nname = \"a\"\nversion = \"1.0\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.toml"),
            "[package]\nname = \"b\"\nversion = \"2.0\"\n[build]\nrequires = [\"a\"]\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README"), "not a recipe").unwrap();

        let store = RecipeStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.candidates("b")[0].dependencies[0].name, "a");
    }

    #[test]
    fn test_load_dir_reports_bad_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.toml"), "[package]\nname = \"x\"\n").unwrap();

        match RecipeStore::load_dir(dir.path()).unwrap_err() {
            ParseError::MalformedRecipe { origin, .. } => assert!(origin.ends_with("bad.toml")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_missing_dir() {
        assert!(matches!(
            RecipeStore::load_dir(Path::new("/nonexistent/recipes")),
            Err(ParseError::Io { .. })
        ));
    }
}
