// src/kitchen/config.rs

//! Configuration for the Kitchen executor

use std::path::PathBuf;
use std::time::Duration;

/// PATH exported to every build step
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Configuration for the Kitchen
#[derive(Debug, Clone)]
pub struct KitchenConfig {
    /// Parallel job hint exported as `GALLEY_JOBS`
    pub jobs: u32,
    /// Wall-clock limit for one task, all steps included
    pub timeout: Option<Duration>,
    /// PATH visible to build steps
    pub path: String,
    /// Base directory for relative source paths (usually the recipe directory)
    pub source_base: Option<PathBuf>,
    /// Parent for per-task workspaces (system temp dir if unset)
    pub work_root: Option<PathBuf>,
    /// Download attempts for remote sources
    pub fetch_retries: u32,
    /// Delay before the first download retry, doubled for each further one
    pub fetch_retry_delay: Duration,
    /// Confine steps to a private mount namespace when the host allows it
    pub isolate: bool,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            timeout: Some(Duration::from_secs(3600)),
            path: DEFAULT_PATH.to_string(),
            source_base: None,
            work_root: None,
            fetch_retries: 3,
            fetch_retry_delay: Duration::from_millis(500),
            isolate: true,
        }
    }
}

impl KitchenConfig {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_source_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.source_base = Some(base.into());
        self
    }
}
