// src/scheduler/mod.rs

//! Parallel build scheduling over a resolved dependency graph
//!
//! A fixed pool of scoped worker threads pulls tasks from a shared ready
//! queue. All scheduler state (ready queue, per-node status, pending
//! dependency counts) sits behind one mutex; workers hold it only for state
//! transitions and release it while a task is building.
//!
//! A node becomes ready once every dependency has a committed artifact.
//! Among ready nodes the one with the lowest depth, then the lowest
//! identifier, is dispatched first, so a single worker always builds in
//! the same order.
//!
//! When a task fails, every transitive dependent is marked skipped and
//! never dispatched. Unrelated branches keep building.

mod report;
mod task;

pub use report::{BuildReport, NodeStatus, Outcome};
pub use task::BuildTask;

use crate::cache::{artifact_key, ArtifactCache, StagedArtifact};
use crate::error::BuildError;
use crate::hash::ContentHash;
use crate::recipe::{OptionOverrides, RecipeId};
use crate::resolver::DependencyGraph;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Shared cancellation flag
///
/// Cloning shares the flag. Once cancelled, no new tasks are dispatched
/// and running executors stop at their next check.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for signal handler registration
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Something that can turn a build task into staged output
pub trait Executor: Sync {
    /// Build `task` into a fresh staging directory
    ///
    /// Must return promptly with [`BuildError::Cancelled`] once `cancel`
    /// trips.
    fn execute(&self, task: &BuildTask, cancel: &CancelToken) -> Result<StagedArtifact, BuildError>;
}

/// Ready-queue key: depth first, then identifier
type ReadyKey = (usize, RecipeId);

struct State {
    ready: BTreeSet<ReadyKey>,
    /// Unfinished dependency count per waiting node
    waiting: HashMap<String, usize>,
    finished: BTreeMap<String, NodeStatus>,
    in_flight: usize,
    dispatch_order: Vec<RecipeId>,
    completion_order: Vec<RecipeId>,
}

/// Drives a [`DependencyGraph`] to completion
pub struct Scheduler<'a> {
    cache: &'a ArtifactCache,
    executor: &'a dyn Executor,
    overrides: OptionOverrides,
    cancel: CancelToken,
}

impl<'a> Scheduler<'a> {
    pub fn new(cache: &'a ArtifactCache, executor: &'a dyn Executor) -> Self {
        Self {
            cache,
            executor,
            overrides: OptionOverrides::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Caller flag overrides applied to every task
    pub fn with_overrides(mut self, overrides: OptionOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Build every node of `graph` using up to `workers` threads
    pub fn schedule(&self, graph: &DependencyGraph, workers: usize) -> BuildReport {
        let mut state = State {
            ready: BTreeSet::new(),
            waiting: HashMap::new(),
            finished: BTreeMap::new(),
            in_flight: 0,
            dispatch_order: Vec::new(),
            completion_order: Vec::new(),
        };

        for node in graph.nodes() {
            let deps = graph.dependencies(node.name()).len();
            if deps == 0 {
                state.ready.insert((node.depth, node.id().clone()));
            } else {
                state.waiting.insert(node.name().to_string(), deps);
            }
        }

        let workers = workers.max(1).min(graph.len().max(1));
        info!("Building {} recipes with {} workers", graph.len(), workers);

        let shared = (Mutex::new(state), Condvar::new());
        std::thread::scope(|s| {
            for worker in 0..workers {
                let shared = &shared;
                s.spawn(move || self.worker_loop(worker, graph, shared));
            }
        });

        let state = shared.0.into_inner().unwrap_or_else(PoisonError::into_inner);
        self.finish(graph, state)
    }

    fn worker_loop(&self, worker: usize, graph: &DependencyGraph, shared: &(Mutex<State>, Condvar)) {
        let (lock, ready_signal) = shared;

        loop {
            let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);

            let (key, task) = loop {
                if self.cancel.is_cancelled() {
                    cancel_undispatched(graph, &mut state);
                }

                if let Some((depth, id)) = state.ready.pop_first() {
                    state.in_flight += 1;
                    state.dispatch_order.push(id.clone());
                    let task = self.prepare(graph, &state, depth, &id);
                    break ((depth, id), task);
                }

                if state.in_flight == 0 {
                    ready_signal.notify_all();
                    return;
                }

                state = ready_signal
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            };
            drop(state);

            debug!("Worker {} building {}", worker, key.1);
            let status = self.run_task(task);

            let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.complete(graph, &mut state, key.1, status);
            drop(state);
            ready_signal.notify_all();
        }
    }

    /// Assemble the task for a ready node from its dependencies' artifacts
    fn prepare(
        &self,
        graph: &DependencyGraph,
        state: &State,
        depth: usize,
        id: &RecipeId,
    ) -> Result<BuildTask, BuildError> {
        let node = graph.node(&id.name).ok_or_else(|| {
            BuildError::Sandbox(format!("{} is not part of the build graph", id))
        })?;

        let mut dependencies = Vec::new();
        for dep in graph.dependencies(&id.name) {
            let artifact = state
                .finished
                .get(dep.name())
                .and_then(NodeStatus::artifact)
                .ok_or_else(|| {
                    BuildError::Sandbox(format!("dependency {} of {} has no artifact", dep.id(), id))
                })?;
            dependencies.push((dep.name().to_string(), artifact.clone()));
        }

        let options = self.overrides.apply(&node.recipe);
        let dep_hashes: Vec<(&str, &ContentHash)> = dependencies
            .iter()
            .map(|(name, artifact)| (name.as_str(), &artifact.hash))
            .collect();
        let hash = artifact_key(&node.recipe, &options, &dep_hashes);

        Ok(BuildTask {
            recipe: Arc::clone(&node.recipe),
            options,
            hash,
            dependencies,
            depth,
        })
    }

    /// Serve a task from the cache or build and commit it
    fn run_task(&self, task: Result<BuildTask, BuildError>) -> NodeStatus {
        let task = match task {
            Ok(task) => task,
            Err(e) => return NodeStatus::Failed(e),
        };

        match self.cache.lookup(&task.hash) {
            Ok(Some(artifact)) => {
                info!("{} is up to date ({:.16})", task.id(), task.hash.as_str());
                return NodeStatus::Cached(artifact);
            }
            Ok(None) => {}
            Err(e) => return NodeStatus::Failed(e.into()),
        }

        info!("Building {} [{}]", task.id(), task.options);
        match self.executor.execute(&task, &self.cancel) {
            Ok(staged) => match self.cache.commit(&task.hash, staged) {
                Ok(artifact) => NodeStatus::Built(artifact),
                Err(e) => NodeStatus::Failed(e.into()),
            },
            Err(BuildError::Cancelled) => NodeStatus::Cancelled,
            Err(e) => NodeStatus::Failed(e),
        }
    }

    /// Record a finished task and release or skip its dependents
    fn complete(&self, graph: &DependencyGraph, state: &mut State, id: RecipeId, status: NodeStatus) {
        state.in_flight -= 1;
        state.completion_order.push(id.clone());

        if status.is_success() {
            for dependent in graph.dependents(&id.name) {
                if let Some(count) = state.waiting.get_mut(dependent.name()) {
                    *count -= 1;
                    if *count == 0 {
                        state.waiting.remove(dependent.name());
                        state.ready.insert((dependent.depth, dependent.id().clone()));
                    }
                }
            }
        } else {
            match &status {
                NodeStatus::Failed(e) => warn!("{} failed: {}", id, e),
                _ => debug!("{} {}", id, status.label()),
            }
            let cancelled = matches!(status, NodeStatus::Cancelled);
            for name in graph.transitive_dependents(&id.name) {
                if state.waiting.remove(&name).is_none() {
                    continue;
                }
                let blocked = if cancelled {
                    NodeStatus::Cancelled
                } else {
                    debug!("Skipping {} (depends on {})", name, id);
                    NodeStatus::SkippedDueToDependencyFailure {
                        dependency: id.to_string(),
                    }
                };
                state.finished.insert(name, blocked);
            }
        }

        state.finished.insert(id.name, status);
    }

    fn finish(&self, graph: &DependencyGraph, mut state: State) -> BuildReport {
        // Anything still waiting could only be blocked by a cancelled task
        for name in state.waiting.keys().cloned().collect::<Vec<_>>() {
            state.finished.insert(name, NodeStatus::Cancelled);
        }
        state.waiting.clear();

        let mut nodes = BTreeMap::new();
        for node in graph.nodes() {
            let status = state
                .finished
                .remove(node.name())
                .unwrap_or(NodeStatus::Cancelled);
            nodes.insert(node.name().to_string(), (node.id().clone(), status));
        }

        let all_succeeded = nodes.values().all(|(_, s)| s.is_success());
        let any_cancelled = nodes.values().any(|(_, s)| matches!(s, NodeStatus::Cancelled));
        let roots: Vec<&NodeStatus> = graph
            .roots()
            .filter_map(|r| nodes.get(r.name()).map(|(_, s)| s))
            .collect();
        let root_failed = roots.iter().any(|s| matches!(s, NodeStatus::Failed(_)));
        let root_delivered = roots.iter().any(|s| s.is_success());

        let outcome = if all_succeeded {
            Outcome::Success
        } else if self.cancel.is_cancelled() && any_cancelled {
            Outcome::Cancelled
        } else if root_failed || !root_delivered {
            Outcome::Failed
        } else {
            Outcome::PartialFailure
        };

        info!("Build finished: {}", outcome);
        BuildReport {
            outcome,
            nodes,
            dispatch_order: state.dispatch_order,
            completion_order: state.completion_order,
        }
    }
}

/// Mark every node not yet dispatched as cancelled
fn cancel_undispatched(graph: &DependencyGraph, state: &mut MutexGuard<'_, State>) {
    let ready = std::mem::take(&mut state.ready);
    for (_, id) in ready {
        state.finished.insert(id.name, NodeStatus::Cancelled);
    }
    let waiting: Vec<String> = state.waiting.drain().map(|(name, _)| name).collect();
    for name in waiting {
        if graph.contains(&name) {
            state.finished.insert(name, NodeStatus::Cancelled);
        }
    }
}
