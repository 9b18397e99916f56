// src/kitchen/sandbox.rs

//! Process isolation for build steps
//!
//! Each step runs as `sh -c <command>` in its own process group with a
//! cleared environment. Stdout and stderr go to a per-step log file rather
//! than pipes, so a chatty build can never block on a full pipe buffer.
//!
//! Filesystem isolation uses a private mount namespace: the step is chrooted
//! into an empty root that only contains the configured bind mounts, each at
//! its host path. Dependency outputs are mounted read-only, so a step sees
//! nothing of the cache beyond what its task declared. Where mount
//! namespaces are unavailable (no `CAP_SYS_ADMIN`), steps run on the host
//! filesystem and a warning is logged once.
//!
//! The wait loop polls so that both the task deadline and the cancel token
//! are observed; either one kills the whole process group, taking any
//! background jobs the step spawned with it.

use crate::error::BuildError;
use crate::scheduler::CancelToken;
use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{chdir, chroot, Pid};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How often a running step checks for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Most output kept in a step failure
const OUTPUT_TAIL: usize = 64 * 1024;

/// Shell used to run step commands
const SHELL: &str = "/bin/sh";

/// A host path made visible inside the sandbox at the same location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    /// Whether steps may write through the mount
    pub writable: bool,
}

impl BindMount {
    pub fn readonly(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            writable: false,
        }
    }

    pub fn writable(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            writable: true,
        }
    }
}

/// Host tools every step can use, read-only
pub fn default_bind_mounts() -> Vec<BindMount> {
    let mut mounts: Vec<BindMount> = ["/usr", "/lib", "/lib64", "/bin", "/sbin"]
        .into_iter()
        .chain(["/etc/passwd", "/etc/group", "/etc/hosts"])
        .map(BindMount::readonly)
        .collect();
    // Character devices; writes to them never touch the disk
    mounts.extend(
        ["/dev/null", "/dev/zero", "/dev/random", "/dev/urandom"]
            .into_iter()
            .map(BindMount::writable),
    );
    mounts
}

/// Isolation settings for the steps of one task
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Working directory for every step
    pub workdir: PathBuf,
    /// The complete step environment; nothing is inherited
    pub env: BTreeMap<String, String>,
    /// Wall-clock limit shared by all steps of the task
    pub timeout: Option<Duration>,
    /// Run steps in a private mount namespace that only sees `bind_mounts`
    pub isolate: bool,
    pub bind_mounts: Vec<BindMount>,
}

/// Mount namespace layout prepared in the parent and entered by each step
#[derive(Debug, Clone)]
struct MountPlan {
    root: PathBuf,
    /// (source, target under root, writable), parents before children
    mounts: Vec<(PathBuf, PathBuf, bool)>,
    workdir: PathBuf,
}

impl MountPlan {
    /// Create the mount points under `root`; missing sources are skipped
    fn prepare(root: &Path, bind_mounts: &[BindMount], workdir: &Path) -> io::Result<Self> {
        let mut mounts = Vec::new();
        for bm in bind_mounts {
            if !bm.source.exists() {
                debug!("Skipping bind mount, source doesn't exist: {}", bm.source.display());
                continue;
            }
            let source = std::path::absolute(&bm.source)?;
            let target = root.join(source.strip_prefix("/").unwrap_or(&source));

            if source.is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                if !target.exists() {
                    File::create(&target)?;
                }
            }
            mounts.push((source, target, bm.writable));
        }
        mounts.sort_by(|a, b| a.1.cmp(&b.1));

        Ok(Self {
            root: root.to_path_buf(),
            mounts,
            workdir: std::path::absolute(workdir)?,
        })
    }

    /// Runs in the forked child before exec; only syscalls, no allocation
    /// for ordinary path lengths
    fn enter(&self) -> nix::Result<()> {
        unshare(CloneFlags::CLONE_NEWNS)?;
        // Keep our mounts out of the host namespace
        mount::<str, str, str, str>(None, "/", None, MsFlags::MS_PRIVATE | MsFlags::MS_REC, None)?;

        for (source, target, writable) in &self.mounts {
            mount::<Path, Path, str, str>(
                Some(source.as_path()),
                target.as_path(),
                None,
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None,
            )?;
            if !writable {
                mount::<str, Path, str, str>(
                    None,
                    target.as_path(),
                    None,
                    MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
                    None,
                )?;
            }
        }

        chroot(self.root.as_path())?;
        chdir(self.workdir.as_path())
    }
}

/// Whether steps can run in a private mount namespace
///
/// Checked once per process by starting a shell in a fresh namespace.
pub fn isolation_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();

    *AVAILABLE.get_or_init(|| {
        let mut check = Command::new(SHELL);
        check
            .arg("-c")
            .arg(":")
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // SAFETY: unshare(2) is async-signal-safe
        unsafe {
            check.pre_exec(|| unshare(CloneFlags::CLONE_NEWNS).map_err(io::Error::from));
        }

        let available = check.status().map(|s| s.success()).unwrap_or(false);
        if !available {
            warn!("Mount namespaces unavailable, build steps will see the host filesystem");
        }
        available
    })
}

/// Runs build steps for one task
pub struct Sandbox {
    config: SandboxConfig,
    plan: Option<MountPlan>,
    /// Holds the mount points; removed when the sandbox is dropped
    _root: Option<TempDir>,
    started: Instant,
}

impl Sandbox {
    /// Create a sandbox; the timeout clock starts now
    pub fn new(config: SandboxConfig) -> Result<Self, BuildError> {
        let (plan, root) = if config.isolate && isolation_available() {
            let root = tempfile::Builder::new()
                .prefix("galley-root-")
                .tempdir()
                .map_err(|e| sandbox_err(format!("cannot create sandbox root: {}", e)))?;
            let plan = MountPlan::prepare(root.path(), &config.bind_mounts, &config.workdir)
                .map_err(|e| sandbox_err(format!("cannot prepare sandbox root: {}", e)))?;
            (Some(plan), Some(root))
        } else {
            (None, None)
        };

        Ok(Self {
            config,
            plan,
            _root: root,
            started: Instant::now(),
        })
    }

    /// Whether steps run in a private mount namespace
    pub fn is_isolated(&self) -> bool {
        self.plan.is_some()
    }

    /// Time left before the task deadline
    fn remaining(&self) -> Option<Duration> {
        self.config
            .timeout
            .map(|limit| limit.saturating_sub(self.started.elapsed()))
    }

    /// Run one step, writing its output to `log_path`
    ///
    /// Returns the captured output on success.
    pub fn run(
        &self,
        step: &str,
        command: &str,
        log_path: &Path,
        cancel: &CancelToken,
    ) -> Result<String, BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        if let (Some(limit), Some(Duration::ZERO)) = (self.config.timeout, self.remaining()) {
            return Err(BuildError::Timeout {
                step: step.to_string(),
                after: limit,
                output: String::new(),
            });
        }

        debug!("Running step '{}': {}", step, command);

        let log = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(log_path)
            .map_err(|e| sandbox_err(format!("cannot open step log {}: {}", log_path.display(), e)))?;
        let stderr = log
            .try_clone()
            .map_err(|e| sandbox_err(format!("cannot clone log handle: {}", e)))?;

        let mut cmd = Command::new(SHELL);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.config.workdir)
            .env_clear()
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .process_group(0);

        if let Some(plan) = &self.plan {
            let plan = plan.clone();
            // SAFETY: the hook only issues unshare, mount, chroot and chdir
            unsafe {
                cmd.pre_exec(move || plan.enter().map_err(io::Error::from));
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| sandbox_err(format!("failed to spawn step '{}': {}", step, e)))?;

        let status = self.wait(&mut child, step, cancel).map_err(|e| match e {
            BuildError::Timeout { step, after, .. } => BuildError::Timeout {
                step,
                after,
                output: read_tail(log_path),
            },
            other => other,
        })?;
        let output = read_tail(log_path);

        if status.success() {
            Ok(output)
        } else {
            Err(BuildError::StepFailed {
                step: step.to_string(),
                status: status.code(),
                output,
            })
        }
    }

    fn wait(
        &self,
        child: &mut Child,
        step: &str,
        cancel: &CancelToken,
    ) -> Result<ExitStatus, BuildError> {
        loop {
            let slice = match self.remaining() {
                Some(left) => left.min(POLL_INTERVAL),
                None => POLL_INTERVAL,
            };

            let waited = child
                .wait_timeout(slice)
                .map_err(|e| sandbox_err(format!("failed to wait for step '{}': {}", step, e)))?;
            if let Some(status) = waited {
                return Ok(status);
            }

            if cancel.is_cancelled() {
                warn!("Cancelling step '{}'", step);
                kill_group(child);
                return Err(BuildError::Cancelled);
            }

            if let (Some(limit), Some(Duration::ZERO)) = (self.config.timeout, self.remaining()) {
                warn!("Step '{}' exceeded {:?}, killing", step, limit);
                kill_group(child);
                return Err(BuildError::Timeout {
                    step: step.to_string(),
                    after: limit,
                    output: String::new(),
                });
            }
        }
    }
}

fn sandbox_err(msg: String) -> BuildError {
    BuildError::Sandbox(msg)
}

/// Kill the step's process group and reap the shell
fn kill_group(child: &mut Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pgid, e);
        let _ = child.kill();
    }
    let _ = child.wait();
}

/// Read at most the last [`OUTPUT_TAIL`] bytes of a log as text
pub(crate) fn read_tail(path: &Path) -> String {
    let mut data = Vec::new();
    if let Err(e) = File::open(path).and_then(|mut f| f.read_to_end(&mut data)) {
        return format!("<output unavailable: {}>", e);
    }
    let start = data.len().saturating_sub(OUTPUT_TAIL);
    String::from_utf8_lossy(&data[start..]).into_owned()
}

/// Copy a step log into the task log under a header
pub(crate) fn append_log(task_log: &mut File, step: &str, step_log: &Path) -> std::io::Result<()> {
    use std::io::Write;

    writeln!(task_log, "=== {} ===", step)?;
    if let Ok(mut f) = File::open(step_log) {
        std::io::copy(&mut f, task_log)?;
    }
    writeln!(task_log)?;
    let _ = fs::remove_file(step_log);
    Ok(())
}
