// src/scheduler/report.rs

//! Results of a scheduled build

use crate::cache::Artifact;
use crate::error::BuildError;
use crate::recipe::RecipeId;
use std::collections::BTreeMap;
use std::fmt;

/// Final state of one graph node
#[derive(Debug)]
pub enum NodeStatus {
    /// Built by the executor and committed
    Built(Artifact),
    /// Already in the cache, executor not invoked
    Cached(Artifact),
    Failed(BuildError),
    /// Never dispatched because a dependency did not succeed
    SkippedDueToDependencyFailure { dependency: String },
    /// Never dispatched, or interrupted, because the build was cancelled
    Cancelled,
}

impl NodeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, NodeStatus::Built(_) | NodeStatus::Cached(_))
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            NodeStatus::Built(a) | NodeStatus::Cached(a) => Some(a),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeStatus::Built(_) => "built",
            NodeStatus::Cached(_) => "cached",
            NodeStatus::Failed(_) => "failed",
            NodeStatus::SkippedDueToDependencyFailure { .. } => "skipped",
            NodeStatus::Cancelled => "cancelled",
        }
    }
}

/// Overall result of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Some nodes failed or were skipped, but a requested root was delivered
    PartialFailure,
    /// No root was delivered, or a root's own build failed
    Failed,
    Cancelled,
}

impl Outcome {
    /// Process exit code for this outcome
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::PartialFailure | Outcome::Failed => 1,
            Outcome::Cancelled => 3,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::PartialFailure => "partial failure",
            Outcome::Failed => "failed",
            Outcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Everything a scheduler run produced
#[derive(Debug)]
pub struct BuildReport {
    pub outcome: Outcome,
    /// Final status of every node, keyed by recipe name
    pub nodes: BTreeMap<String, (RecipeId, NodeStatus)>,
    /// Order tasks were handed to workers (cache hits included)
    pub dispatch_order: Vec<RecipeId>,
    /// Order tasks finished
    pub completion_order: Vec<RecipeId>,
}

impl BuildReport {
    pub fn status(&self, name: &str) -> Option<&NodeStatus> {
        self.nodes.get(name).map(|(_, status)| status)
    }

    fn filter<'a>(
        &'a self,
        pred: impl Fn(&NodeStatus) -> bool + 'a,
    ) -> impl Iterator<Item = &'a RecipeId> + 'a {
        self.nodes
            .values()
            .filter(move |(_, status)| pred(status))
            .map(|(id, _)| id)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &RecipeId> + '_ {
        self.filter(NodeStatus::is_success)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&RecipeId, &BuildError)> + '_ {
        self.nodes.values().filter_map(|(id, status)| match status {
            NodeStatus::Failed(e) => Some((id, e)),
            _ => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &RecipeId> + '_ {
        self.filter(|s| matches!(s, NodeStatus::SkippedDueToDependencyFailure { .. }))
    }

    pub fn cancelled(&self) -> impl Iterator<Item = &RecipeId> + '_ {
        self.filter(|s| matches!(s, NodeStatus::Cancelled))
    }

    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }
}
