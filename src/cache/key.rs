// src/cache/key.rs

//! Content hash for build outputs
//!
//! An artifact is addressed by a hash over everything that can change what
//! a build produces:
//! - Recipe identity, source reference and steps
//! - Step environment and substitution variables
//! - Effective configuration flags
//! - Content hashes of the direct dependency artifacts
//!
//! Dependency hashes already cover their own closures, so the key of a
//! recipe changes whenever anything below it in the graph changes.

use crate::hash::{ContentHash, HashAlgorithm, Hasher};
use crate::recipe::{BuildOptions, Recipe};
use tracing::debug;

/// Bumped whenever the key layout changes, invalidating old entries
const KEY_FORMAT: &str = "galley-artifact-v1";

/// Compute the artifact key for a recipe build
///
/// `dependencies` pairs each direct dependency's name with its artifact
/// hash; order does not matter.
pub fn artifact_key(
    recipe: &Recipe,
    options: &BuildOptions,
    dependencies: &[(&str, &ContentHash)],
) -> ContentHash {
    let mut hasher = Hasher::new(HashAlgorithm::Sha256);
    hasher.update_field("format", KEY_FORMAT.as_bytes());

    hasher.update_field("name", recipe.name().as_bytes());
    // Raw form, so 1.0 and 1.0.0 build distinct artifacts
    hasher.update_field("version", recipe.version().as_str().as_bytes());

    if let Some(source) = &recipe.source {
        hasher.update_field("source.uri", source.uri.as_bytes());
        hasher.update_field("source.checksum", source.checksum.to_prefixed_string().as_bytes());
        hasher.update_field("source.unpack", &[source.unpack as u8]);
    }

    for step in &recipe.steps {
        hasher.update_field("step.name", step.name.as_bytes());
        hasher.update_field("step.run", step.run.as_bytes());
        hasher.update_field("step.when", step.when.as_deref().unwrap_or("").as_bytes());
        hasher.update_field("step.unless", step.unless.as_deref().unwrap_or("").as_bytes());
    }

    for (key, value) in &recipe.environment {
        hasher.update_field("env.key", key.as_bytes());
        hasher.update_field("env.value", value.as_bytes());
    }
    for (key, value) in &recipe.variables {
        hasher.update_field("var.key", key.as_bytes());
        hasher.update_field("var.value", value.as_bytes());
    }

    for (flag, enabled) in options.iter() {
        hasher.update_field("flag", flag.as_bytes());
        hasher.update_field("flag.value", &[enabled as u8]);
    }

    let mut deps: Vec<(&str, &ContentHash)> = dependencies.to_vec();
    deps.sort_by(|a, b| a.0.cmp(b.0));
    for (name, hash) in deps {
        hasher.update_field("dep.name", name.as_bytes());
        hasher.update_field("dep.hash", hash.as_str().as_bytes());
    }

    let key = hasher.finalize();
    debug!("Artifact key for {}: {:.16}", recipe.id, key.as_str());
    key
}
