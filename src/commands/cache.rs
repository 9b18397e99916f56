// src/commands/cache.rs

//! Cache command - artifact cache maintenance

use super::format_bytes;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use galley::cache::{ArtifactCache, GcPolicy};
use galley::config::EngineConfig;
use std::time::{Duration, SystemTime};

fn open(config: &EngineConfig) -> Result<ArtifactCache> {
    ArtifactCache::open(config.cache_config())
        .with_context(|| format!("Failed to open cache at {}", config.cache_dir.display()))
}

pub fn cmd_cache_gc(config: &EngineConfig, max_age_days: Option<u64>, max_size: Option<u64>) -> Result<()> {
    let cache = open(config)?;
    let policy = GcPolicy {
        max_age: max_age_days.map(|days| Duration::from_secs(days * 24 * 60 * 60)),
        max_size,
        ..GcPolicy::default()
    };

    let report = cache.gc(&policy).context("Cache gc failed")?;
    println!(
        "Removed {} artifacts and {} staging directories, freed {}",
        report.removed_entries,
        report.removed_staging,
        format_bytes(report.freed_bytes)
    );
    Ok(())
}

pub fn cmd_cache_stats(config: &EngineConfig) -> Result<()> {
    let cache = open(config)?;
    let stats = cache.stats().context("Failed to read cache statistics")?;

    println!("Cache: {}", cache.root().display());
    println!("  Artifacts:  {}", stats.entry_count);
    println!("  Total size: {}", format_bytes(stats.total_size));
    println!("  Staging:    {}", stats.staging_count);
    if let Some(oldest) = stats.oldest {
        println!("  Oldest use: {}", format_time(oldest));
    }
    if let Some(newest) = stats.newest {
        println!("  Newest use: {}", format_time(newest));
    }
    Ok(())
}

pub fn cmd_cache_clear(config: &EngineConfig) -> Result<()> {
    let cache = open(config)?;
    let removed = cache.clear().context("Failed to clear cache")?;
    println!("Removed {} artifacts", removed);
    Ok(())
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
