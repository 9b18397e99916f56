// src/commands/build.rs

//! Build command - resolve, schedule and cook recipes

use anyhow::{Context, Result};
use galley::cache::ArtifactCache;
use galley::config::EngineConfig;
use galley::kitchen::Kitchen;
use galley::recipe::{OptionOverrides, Recipe};
use galley::scheduler::{BuildReport, CancelToken, NodeStatus, Scheduler};
use tracing::{info, warn};

/// Lines of step output shown for a failed recipe
const FAILURE_TAIL_LINES: usize = 20;

/// Build `roots` and their dependencies; returns the process exit code
pub fn cmd_build(config: &EngineConfig, roots: &[String], overrides: OptionOverrides) -> Result<u8> {
    let graph = super::load_graph(config, roots)?;

    let recipes: Vec<&Recipe> = graph.nodes().map(|n| n.recipe.as_ref()).collect();
    overrides
        .validate(recipes.iter().copied())
        .context("Invalid flag override")?;

    let cache = ArtifactCache::open(config.cache_config()).with_context(|| {
        format!("Failed to open cache at {}", config.cache_dir.display())
    })?;

    let cancel = CancelToken::new();
    let flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nCancelling build...");
        flag.cancel();
    }) {
        warn!("Failed to set Ctrl+C handler: {}", e);
    }

    let kitchen = Kitchen::new(config.kitchen_config(), &cache);
    let scheduler = Scheduler::new(&cache, &kitchen)
        .with_overrides(overrides)
        .with_cancel_token(cancel);

    info!(
        "Building {} recipes with up to {} workers",
        graph.len(),
        config.jobs
    );
    let report = scheduler.schedule(&graph, config.jobs);

    print_report(&report, &cache);
    Ok(report.exit_code())
}

fn print_report(report: &BuildReport, cache: &ArtifactCache) {
    println!();
    for (id, status) in report.nodes.values() {
        match status {
            NodeStatus::Built(artifact) | NodeStatus::Cached(artifact) => {
                println!(
                    "  {:<9} {} -> {}",
                    status.label(),
                    id,
                    artifact.out_dir().display()
                );
            }
            NodeStatus::Failed(err) => {
                println!("  {:<9} {}: {}", status.label(), id, err);
                if let Some(output) = err.output() {
                    print_tail(output);
                }
                let log = cache.failure_log_path(&id.to_string());
                if log.exists() {
                    println!("      full log: {}", log.display());
                }
            }
            NodeStatus::SkippedDueToDependencyFailure { dependency } => {
                println!("  {:<9} {} (needs {})", status.label(), id, dependency);
            }
            NodeStatus::Cancelled => {
                println!("  {:<9} {}", status.label(), id);
            }
        }
    }

    println!();
    println!(
        "Build {}: {} succeeded, {} failed, {} skipped, {} cancelled",
        report.outcome,
        report.succeeded().count(),
        report.failed().count(),
        report.skipped().count(),
        report.cancelled().count()
    );
}

fn print_tail(output: &str) {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(FAILURE_TAIL_LINES);
    for line in &lines[start..] {
        println!("      | {}", line);
    }
}
