// src/kitchen/mod.rs

//! Kitchen: the isolated build environment for cooking recipes
//!
//! The Kitchen turns a [`BuildTask`] into a staged artifact:
//! 1. **Prep** - stage an output directory and create a scratch workspace
//! 2. **Ingredients** - fetch, verify and optionally unpack the source
//! 3. **Cook** - run each enabled step in the sandbox, in declared order
//!
//! Every step sees the same cleared environment: a fixed PATH, HOME and
//! TMPDIR inside the workspace, the `GALLEY_*` task variables and the
//! recipe's own `[build.environment]`. On the filesystem a step sees the
//! host tool directories, its workspace, its own output directory and the
//! outputs of its declared dependencies (read-only), nothing else. Step
//! output is collected into the staged `build.log` under a header per step.
//!
//! On any failure the build log is kept in the cache's `logs/` directory
//! and the staging directory is discarded, so a half-built tree never
//! reaches the cache.

mod config;
pub mod fetch;
mod sandbox;

pub use config::{KitchenConfig, DEFAULT_PATH};
pub use fetch::{SourceFetcher, SourceLocation};
pub use sandbox::{default_bind_mounts, isolation_available, BindMount, Sandbox, SandboxConfig};

use crate::cache::{ArtifactCache, StagedArtifact};
use crate::error::BuildError;
use crate::scheduler::{BuildTask, CancelToken, Executor};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// The Kitchen: where recipes are cooked
pub struct Kitchen<'a> {
    config: KitchenConfig,
    cache: &'a ArtifactCache,
    fetcher: SourceFetcher,
}

impl<'a> Kitchen<'a> {
    /// Create a Kitchen staging its output in `cache`
    pub fn new(config: KitchenConfig, cache: &'a ArtifactCache) -> Self {
        let fetcher = SourceFetcher::new(cache.sources_dir())
            .with_base_dir(config.source_base.clone())
            .with_retries(config.fetch_retries, config.fetch_retry_delay);
        Self {
            config,
            cache,
            fetcher,
        }
    }

    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    /// Cook a task into `staged`, leaving the step logs in `build.log`
    fn cook(
        &self,
        task: &BuildTask,
        staged: &StagedArtifact,
        cancel: &CancelToken,
    ) -> Result<(), BuildError> {
        let recipe = &task.recipe;
        let workspace = self.workspace()?;
        let src_root = self.prep_source(task, workspace.path())?;
        let out_dir = staged.out_dir();

        let mut build_log = File::create(staged.log_path())
            .map_err(|e| sandbox_err(format!("cannot create build log: {}", e)))?;

        let sandbox = Sandbox::new(SandboxConfig {
            workdir: src_root.clone(),
            env: self.environment(task, workspace.path(), &src_root, &out_dir),
            timeout: self.config.timeout,
            isolate: self.config.isolate,
            bind_mounts: bind_mounts(task, workspace.path(), &out_dir),
        })?;

        let out = out_dir.to_string_lossy();
        let src = src_root.to_string_lossy();
        let step_log = workspace.path().join("step.log");

        for step in &recipe.steps {
            if !task.options.allows(step) {
                info!("Skipping step '{}' of {} [{}]", step.name, task.id(), task.options);
                continue;
            }

            let command = recipe.substitute(&step.run, &out, &src);
            let result = sandbox.run(&step.name, &command, &step_log, cancel);

            sandbox::append_log(&mut build_log, &step.name, &step_log)
                .map_err(|e| sandbox_err(format!("cannot write build log: {}", e)))?;
            if let Err(e) = result {
                return Err(with_build_log(e, &staged.log_path()));
            }
        }

        Ok(())
    }

    fn workspace(&self) -> Result<TempDir, BuildError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("galley-");
        let workspace = match &self.config.work_root {
            Some(root) => {
                fs::create_dir_all(root)
                    .map_err(|e| sandbox_err(format!("cannot create {}: {}", root.display(), e)))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| sandbox_err(format!("cannot create workspace: {}", e)))?;

        for dir in ["src", "home", "tmp"] {
            let path = workspace.path().join(dir);
            fs::create_dir_all(&path)
                .map_err(|e| sandbox_err(format!("cannot create {}: {}", path.display(), e)))?;
        }
        debug!("Workspace for build: {}", workspace.path().display());
        Ok(workspace)
    }

    /// Fetch the source into `<workspace>/src` and return the source root
    fn prep_source(&self, task: &BuildTask, workspace: &Path) -> Result<PathBuf, BuildError> {
        let src_dir = workspace.join("src");
        let (Some(source), Some(uri)) = (&task.recipe.source, task.recipe.source_uri()) else {
            return Ok(src_dir);
        };

        let fetched = self.fetcher.fetch(&uri, &source.checksum)?;

        if source.unpack {
            fetch::unpack(&fetched, &src_dir)
        } else {
            let dest = src_dir.join(fetch::source_file_name(&uri));
            fs::copy(&fetched, &dest)
                .map_err(|e| sandbox_err(format!("cannot copy source to {}: {}", dest.display(), e)))?;
            Ok(src_dir)
        }
    }

    /// The complete step environment for a task
    fn environment(
        &self,
        task: &BuildTask,
        workspace: &Path,
        src: &Path,
        out: &Path,
    ) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), self.config.path.clone());
        env.insert("HOME".to_string(), path_str(&workspace.join("home")));
        env.insert("TMPDIR".to_string(), path_str(&workspace.join("tmp")));

        // Recipe variables may override the defaults above, not the task variables below
        for (key, value) in &task.recipe.environment {
            env.insert(key.clone(), value.clone());
        }

        let jobs = task.recipe.jobs.unwrap_or(self.config.jobs).max(1);
        env.insert("GALLEY_OUT".to_string(), path_str(out));
        env.insert("GALLEY_SRC".to_string(), path_str(src));
        env.insert("GALLEY_JOBS".to_string(), jobs.to_string());
        env.insert("GALLEY_NAME".to_string(), task.recipe.name().to_string());
        env.insert(
            "GALLEY_VERSION".to_string(),
            task.recipe.version().as_str().to_string(),
        );

        for (name, artifact) in &task.dependencies {
            env.insert(
                format!("GALLEY_DEP_{}", env_suffix(name)),
                path_str(&artifact.out_dir()),
            );
        }
        for flag in task.options.enabled_flags() {
            env.insert(format!("GALLEY_FLAG_{}", env_suffix(flag)), "1".to_string());
        }

        env
    }
}

impl Executor for Kitchen<'_> {
    fn execute(&self, task: &BuildTask, cancel: &CancelToken) -> Result<StagedArtifact, BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let staged = self.cache.stage(&task.id().to_string())?;
        // A log left by an earlier failed attempt no longer applies
        let _ = fs::remove_file(self.cache.failure_log_path(staged.recipe()));

        match self.cook(task, &staged, cancel) {
            Ok(()) => {
                info!("Cooked {}", task.id());
                Ok(staged)
            }
            Err(e) => {
                match self.cache.save_failure_log(&staged) {
                    Ok(Some(log)) => info!("Build log of {} kept at {}", task.id(), log.display()),
                    Ok(None) => {}
                    Err(err) => warn!("Failed to keep build log of {}: {}", task.id(), err),
                }
                staged.discard();
                Err(e)
            }
        }
    }
}

/// Paths a task's steps may see: tools, the workspace, its output and its
/// dependencies' outputs
fn bind_mounts(task: &BuildTask, workspace: &Path, out: &Path) -> Vec<BindMount> {
    let mut mounts = default_bind_mounts();
    mounts.push(BindMount::writable(workspace));
    mounts.push(BindMount::writable(out));
    mounts.extend(
        task.dependencies
            .iter()
            .map(|(_, artifact)| BindMount::readonly(artifact.out_dir())),
    );
    mounts
}

/// Replace a step failure's output with the tail of the whole task log
fn with_build_log(err: BuildError, log: &Path) -> BuildError {
    match err {
        BuildError::StepFailed { step, status, .. } => BuildError::StepFailed {
            step,
            status,
            output: sandbox::read_tail(log),
        },
        BuildError::Timeout { step, after, .. } => BuildError::Timeout {
            step,
            after,
            output: sandbox::read_tail(log),
        },
        other => other,
    }
}

fn sandbox_err(msg: String) -> BuildError {
    BuildError::Sandbox(msg)
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Environment variable suffix for a name: `libstdc++` -> `LIBSTDC__`
fn env_suffix(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
