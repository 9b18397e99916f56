// src/commands/resolve.rs

//! Resolve command - print the dependency graph in build order

use anyhow::Result;
use galley::config::EngineConfig;

pub fn cmd_resolve(config: &EngineConfig, roots: &[String]) -> Result<()> {
    let graph = super::load_graph(config, roots)?;

    println!("Build order ({} recipes):", graph.len());
    for node in graph.topological_order() {
        let deps: Vec<String> = graph
            .dependencies(node.name())
            .iter()
            .map(|d| d.id().to_string())
            .collect();
        let marker = if graph.is_root(node.name()) { "*" } else { " " };

        if deps.is_empty() {
            println!("  {}[{}] {}", marker, node.depth, node.id());
        } else {
            println!(
                "  {}[{}] {} <- {}",
                marker,
                node.depth,
                node.id(),
                deps.join(", ")
            );
        }
    }

    Ok(())
}
