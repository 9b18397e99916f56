// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use galley::cache::{ArtifactCache, CacheConfig};
use galley::kitchen::{Kitchen, KitchenConfig};
use galley::recipe::{DependencySpec, OptionOverrides, RecipeStore};
use galley::resolver::{resolve, DependencyGraph};
use galley::scheduler::{BuildReport, Scheduler};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Render a recipe document
///
/// `steps` are `(name, command)` pairs.
pub fn recipe_toml(name: &str, version: &str, requires: &[&str], steps: &[(&str, &str)]) -> String {
    let requires = requires
        .iter()
        .map(|r| format!("{:?}", r))
        .collect::<Vec<_>>()
        .join(", ");

    let mut doc = format!(
        "[package]\nname = \"{}\"\nversion = \"{}\"\nsummary = \"test recipe\"\nlicense = \"MIT\"\n\n[build]\nrequires = [{}]\n",
        name, version, requires
    );
    for (step, run) in steps {
        doc.push_str(&format!("\n[[steps]]\nname = {:?}\nrun = {:?}\n", step, run));
    }
    doc
}

/// A recipe directory and an artifact cache in one temporary tree
pub struct Workspace {
    temp: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("recipes")).unwrap();
        Self { temp }
    }

    pub fn recipes_dir(&self) -> PathBuf {
        self.temp.path().join("recipes")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.temp.path().join("cache")
    }

    /// Write a recipe file named after the recipe
    pub fn add(&self, name: &str, version: &str, requires: &[&str], steps: &[(&str, &str)]) {
        self.add_raw(
            &format!("{}-{}", name, version),
            &recipe_toml(name, version, requires, steps),
        );
    }

    pub fn add_raw(&self, file_stem: &str, content: &str) {
        fs::write(self.recipes_dir().join(format!("{}.toml", file_stem)), content).unwrap();
    }

    pub fn store(&self) -> RecipeStore {
        RecipeStore::load_dir(&self.recipes_dir()).unwrap()
    }

    pub fn cache(&self) -> ArtifactCache {
        ArtifactCache::open(CacheConfig::with_root(self.cache_dir())).unwrap()
    }

    pub fn graph(&self, roots: &[&str]) -> DependencyGraph {
        resolve(&specs(roots), &self.store()).unwrap()
    }

    /// Resolve and build `roots` with the real Kitchen
    pub fn build(&self, roots: &[&str], workers: usize) -> BuildReport {
        self.build_with(roots, workers, OptionOverrides::new(), None)
    }

    pub fn build_with(
        &self,
        roots: &[&str],
        workers: usize,
        overrides: OptionOverrides,
        timeout: Option<Duration>,
    ) -> BuildReport {
        let graph = self.graph(roots);
        let cache = self.cache();
        let config = KitchenConfig {
            jobs: 2,
            source_base: Some(self.recipes_dir()),
            work_root: Some(self.temp.path().join("work")),
            ..KitchenConfig::default()
        }
        .with_timeout(timeout);
        let kitchen = Kitchen::new(config, &cache);
        Scheduler::new(&cache, &kitchen)
            .with_overrides(overrides)
            .schedule(&graph, workers)
    }

    /// Number of committed artifacts
    pub fn artifact_count(&self) -> u64 {
        self.cache().stats().unwrap().entry_count
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }
}

pub fn specs(roots: &[&str]) -> Vec<DependencySpec> {
    roots.iter().map(|r| DependencySpec::parse(r).unwrap()).collect()
}
