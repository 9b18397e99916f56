// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{CacheCommands, Cli, Commands};
use galley::config::EngineConfig;
use galley::recipe::OptionOverrides;
use galley::{ParseError, ResolutionError};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit code for recipe and resolution errors
const EXIT_INVALID_INPUT: u8 = 2;
/// Exit code for everything else that ends the run early
const EXIT_FATAL: u8 = 3;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over the default level
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = cli.recipes {
        config.recipes_dir = dir;
    }
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    match cli.command {
        Commands::Resolve { roots } => {
            commands::cmd_resolve(&config, &roots)?;
            Ok(0)
        }
        Commands::Build {
            roots,
            jobs,
            timeout,
            enable,
            disable,
        } => {
            if let Some(jobs) = jobs {
                anyhow::ensure!(jobs > 0, "--jobs must be at least 1");
                config.jobs = jobs;
            }
            if let Some(secs) = timeout {
                config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }

            let mut overrides = OptionOverrides::new();
            for flag in &enable {
                overrides = overrides.enable(flag);
            }
            for flag in &disable {
                overrides = overrides.disable(flag);
            }

            commands::cmd_build(&config, &roots, overrides)
        }
        Commands::Cache(cmd) => {
            match cmd {
                CacheCommands::Gc { max_age, max_size } => {
                    commands::cmd_cache_gc(&config, max_age, max_size)?
                }
                CacheCommands::Stats => commands::cmd_cache_stats(&config)?,
                CacheCommands::Clear => commands::cmd_cache_clear(&config)?,
            }
            Ok(0)
        }
    }
}

/// Map an error to its exit code by the first library error in its chain
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.is::<ParseError>() || cause.is::<ResolutionError>() {
            return EXIT_INVALID_INPUT;
        }
        if let Some(e) = cause.downcast_ref::<galley::Error>() {
            return e.exit_code();
        }
    }
    EXIT_FATAL
}
