// src/cli/cache.rs
//! Artifact cache subcommands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Remove stale staging directories, old entries and entries over the size limit
    Gc {
        /// Remove entries unused for this many days
        #[arg(long, value_name = "DAYS")]
        max_age: Option<u64>,

        /// Evict least recently used entries until the cache fits
        #[arg(long, value_name = "BYTES")]
        max_size: Option<u64>,
    },

    /// Show cache size and entry counts
    Stats,

    /// Remove every cached artifact
    Clear,
}
