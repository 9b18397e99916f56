// src/cli/mod.rs
//! CLI definitions for galley
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `resolve` - Print the resolved dependency graph in build order
//! - `build` - Build recipes and their dependencies
//! - `cache` - Inspect and maintain the artifact cache

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cache;

pub use cache::CacheCommands;

#[derive(Parser)]
#[command(name = "galley")]
#[command(author = "Galley Contributors")]
#[command(version)]
#[command(about = "Build packages from declarative recipes, never twice", long_about = None)]
pub struct Cli {
    /// Directory containing recipe files, overrides GALLEY_RECIPES
    #[arg(long, global = true, value_name = "DIR")]
    pub recipes: Option<PathBuf>,

    /// Artifact cache root, overrides GALLEY_CACHE_DIR
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve the dependency closure of recipes and print it in build order
    Resolve {
        /// Root recipes (`name`, `name@version` or `"name >= 1.0"`)
        #[arg(required = true)]
        roots: Vec<String>,
    },

    /// Build recipes and everything they depend on
    Build {
        /// Root recipes (`name`, `name@version` or `"name >= 1.0"`)
        #[arg(required = true)]
        roots: Vec<String>,

        /// Parallel build workers, overrides GALLEY_JOBS
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Per-recipe timeout in seconds (0 disables), overrides GALLEY_TIMEOUT
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Enable a flag (`flag` or `recipe:flag`)
        #[arg(long = "enable", value_name = "FLAG")]
        enable: Vec<String>,

        /// Disable a flag (`flag` or `recipe:flag`)
        #[arg(long = "disable", value_name = "FLAG")]
        disable: Vec<String>,
    },

    /// Artifact cache maintenance
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build() {
        let cli = Cli::try_parse_from([
            "galley",
            "--cache-dir",
            "/tmp/c",
            "build",
            "app",
            "zlib >= 1.3",
            "-j",
            "4",
            "--enable",
            "ssl",
            "--disable",
            "app:docs",
        ])
        .unwrap();
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/c")));
        match cli.command {
            Commands::Build {
                roots,
                jobs,
                enable,
                disable,
                timeout,
            } => {
                assert_eq!(roots, vec!["app", "zlib >= 1.3"]);
                assert_eq!(jobs, Some(4));
                assert_eq!(enable, vec!["ssl"]);
                assert_eq!(disable, vec!["app:docs"]);
                assert_eq!(timeout, None);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_resolve_requires_root() {
        assert!(Cli::try_parse_from(["galley", "resolve"]).is_err());
    }

    #[test]
    fn test_parse_cache_gc() {
        let cli =
            Cli::try_parse_from(["galley", "cache", "gc", "--max-age", "30", "--max-size", "1000"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache(CacheCommands::Gc {
                max_age: Some(30),
                max_size: Some(1000)
            })
        ));
    }
}
