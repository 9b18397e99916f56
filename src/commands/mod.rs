// src/commands/mod.rs
//! Command handlers for the galley CLI

mod build;
mod cache;
mod resolve;

pub use build::cmd_build;
pub use cache::{cmd_cache_clear, cmd_cache_gc, cmd_cache_stats};
pub use resolve::cmd_resolve;

use anyhow::{Context, Result};
use galley::config::EngineConfig;
use galley::recipe::{DependencySpec, RecipeStore};
use galley::resolver::{self, DependencyGraph};
use galley::ParseError;

/// Load the recipe directory and resolve `roots` against it
fn load_graph(config: &EngineConfig, roots: &[String]) -> Result<DependencyGraph> {
    let roots = roots
        .iter()
        .map(|r| {
            DependencySpec::parse(r).map_err(|reason| ParseError::MalformedRecipe {
                origin: format!("root '{}'", r),
                reason,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let store = RecipeStore::load_dir(&config.recipes_dir).with_context(|| {
        format!(
            "Failed to load recipes from {}",
            config.recipes_dir.display()
        )
    })?;

    let graph = resolver::resolve(&roots, &store).context("Dependency resolution failed")?;
    Ok(graph)
}

/// Format a byte count for display
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_root_is_parse_error() {
        let config = EngineConfig {
            recipes_dir: "/nonexistent/galley-recipes".into(),
            ..EngineConfig::default()
        };
        let err = load_graph(&config, &["zlib >= banana".to_string()]).unwrap_err();
        assert!(err.chain().any(|cause| cause.is::<ParseError>()));
        assert!(err.to_string().contains("root 'zlib >= banana'"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
