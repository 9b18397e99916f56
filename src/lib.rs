// src/lib.rs

//! Galley: declarative build-recipe engine
//!
//! Builds packages from recipe documents, never building the same thing
//! twice.
//!
//! # Architecture
//!
//! - Recipes: one TOML document per package, loaded into a [`RecipeStore`]
//! - Resolution: the transitive closure of the requested roots becomes an
//!   acyclic [`DependencyGraph`], one version per name
//! - Scheduling: a fixed worker pool builds the graph leaves first, skipping
//!   everything downstream of a failure
//! - Kitchen: each step runs in a cleared environment with only its declared
//!   inputs visible
//! - Cache: outputs are addressed by a hash of the recipe, its flags and its
//!   dependencies' hashes, and committed atomically

pub mod cache;
pub mod config;
mod error;
pub mod hash;
pub mod kitchen;
pub mod recipe;
pub mod resolver;
pub mod scheduler;
pub mod version;

pub use cache::{Artifact, ArtifactCache, CacheConfig, GcPolicy, StagedArtifact};
pub use config::EngineConfig;
pub use error::{BuildError, CacheError, Error, ParseError, ResolutionError, Result};
pub use hash::{ContentHash, HashAlgorithm};
pub use kitchen::{Kitchen, KitchenConfig};
pub use recipe::{BuildOptions, DependencySpec, OptionOverrides, Recipe, RecipeId, RecipeStore};
pub use resolver::{resolve, DependencyGraph};
pub use scheduler::{BuildReport, BuildTask, CancelToken, Executor, NodeStatus, Outcome, Scheduler};
pub use version::{PackageVersion, VersionConstraint};
