// src/error.rs

//! Error taxonomy for the build engine
//!
//! Each layer has its own enum so callers can tell how far a failure
//! reaches:
//! - [`ParseError`]: a recipe document is unusable, surfaced immediately
//! - [`ResolutionError`]: the dependency closure is inconsistent, aborts the
//!   run before anything is built
//! - [`BuildError`]: one task failed, contained to that task and its
//!   dependents
//! - [`CacheError`]: artifact storage I/O, retried before it is surfaced for
//!   the affected task

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed recipe {origin}: {reason}")]
    MalformedRecipe { origin: String, reason: String },

    #[error("recipe {recipe}: step '{step}' references undeclared option '{flag}'")]
    InvalidOptionReference {
        recipe: String,
        step: String,
        flag: String,
    },

    #[error("failed to read recipe {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ParseError {
    pub(crate) fn malformed(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        ParseError::MalformedRecipe {
            origin: origin.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("circular dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error(
        "conflicting version requirements for {name}: {}",
        render_constraints(.constraints, .available)
    )]
    VersionConflict {
        name: String,
        /// (requirer, constraint) pairs that cannot all be met
        constraints: Vec<(String, String)>,
        /// Versions known to the store
        available: Vec<String>,
    },

    #[error("missing recipe {name} required by {required_by}")]
    MissingRecipe { name: String, required_by: String },
}

fn render_constraints(constraints: &[(String, String)], available: &[String]) -> String {
    let mut out = constraints
        .iter()
        .map(|(requirer, constraint)| format!("{} requires {}", requirer, constraint))
        .collect::<Vec<_>>()
        .join("; ");
    if !available.is_empty() {
        out.push_str(&format!(" (available: {})", available.join(", ")));
    }
    out
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt cache entry {hash}: {reason}")]
    Corrupt { hash: String, reason: String },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("step '{step}' failed with {}", describe_status(.status))]
    StepFailed {
        step: String,
        /// Exit code, `None` when the step was killed by a signal
        status: Option<i32>,
        output: String,
    },

    #[error("step '{step}' timed out after {after:?}")]
    Timeout {
        step: String,
        after: Duration,
        /// Output collected up to the kill
        output: String,
    },

    #[error("build cancelled")]
    Cancelled,

    #[error("source fetch failed: {0}")]
    SourceFetch(String),

    #[error("sandbox setup failed: {0}")]
    Sandbox(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl BuildError {
    /// Captured build output, for failures that ran a step
    pub fn output(&self) -> Option<&str> {
        match self {
            BuildError::StepFailed { output, .. } | BuildError::Timeout { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {}", code),
        None => "termination by signal".to_string(),
    }
}

/// Top-level error for library entry points
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Process exit code for this error when it ends a CLI invocation
    ///
    /// Recipe and resolution errors both precede any build and share code 2.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Parse(_) | Error::Resolution(_) => 2,
            Error::Build(_) => 1,
            Error::Cache(_) | Error::Config(_) | Error::Io(_) => 3,
        }
    }
}
