// src/config.rs

//! Engine configuration
//!
//! Precedence, highest first: command-line flags, `GALLEY_*` environment
//! variables, built-in defaults. [`EngineConfig::from_lookup`] takes the
//! environment as a function so it can be exercised without touching the
//! process environment.

use crate::cache::CacheConfig;
use crate::error::Error;
use crate::kitchen::KitchenConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_CACHE_DIR: &str = "GALLEY_CACHE_DIR";
pub const ENV_JOBS: &str = "GALLEY_JOBS";
pub const ENV_RECIPES: &str = "GALLEY_RECIPES";
pub const ENV_TIMEOUT: &str = "GALLEY_TIMEOUT";

/// Default directory holding recipe files
pub const DEFAULT_RECIPES_DIR: &str = "recipes";
/// Default artifact cache root
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/galley";
/// Default per-task timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Settings shared by every command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub recipes_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Worker threads for the scheduler
    pub jobs: usize,
    /// Per-task wall-clock limit; `None` disables it
    pub timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recipes_dir: PathBuf::from(DEFAULT_RECIPES_DIR),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(dir) = non_empty(lookup(ENV_RECIPES)) {
            config.recipes_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty(lookup(ENV_CACHE_DIR)) {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(jobs) = non_empty(lookup(ENV_JOBS)) {
            config.jobs = parse_jobs(&jobs)?;
        }
        if let Some(secs) = non_empty(lookup(ENV_TIMEOUT)) {
            config.timeout = parse_timeout(&secs)?;
        }

        Ok(config)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::with_root(&self.cache_dir)
    }

    /// Kitchen settings; relative sources resolve against the recipe directory
    pub fn kitchen_config(&self) -> KitchenConfig {
        KitchenConfig {
            jobs: self.jobs as u32,
            timeout: self.timeout,
            source_base: Some(self.recipes_dir.clone()),
            ..KitchenConfig::default()
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse a worker count; must be at least one
pub fn parse_jobs(value: &str) -> Result<usize, Error> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "{}: expected a positive integer, got '{}'",
            ENV_JOBS, value
        ))),
    }
}

/// Parse a timeout in seconds; `0` disables the timeout
pub fn parse_timeout(value: &str) -> Result<Option<Duration>, Error> {
    let secs = value.trim().parse::<u64>().map_err(|_| {
        Error::Config(format!(
            "{}: expected seconds, got '{}'",
            ENV_TIMEOUT, value
        ))
    })?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
