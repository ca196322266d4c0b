//! Execution context: the mutable state threaded through one TTP run.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use serde_json::Value;

use crate::{
    args::ArgValue, filesystem::Filesystem, filesystem::OsFilesystem, platform::Platform,
    repository::RepoCollection,
};

/// A cooperative cancellation flag shared by a run and every sub-process it
/// spawns. Cloning shares the same underlying flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run mutable state: bound arguments, step outputs, the working
/// directory stack, and the knobs that change engine behaviour (dry-run,
/// no-cleanup, cleanup delay).
pub struct ExecutionContext {
    /// Arguments bound for this run (or the enclosing sub-TTP, for a child).
    pub args_bound: BTreeMap<String, ArgValue>,
    /// Outputs of completed steps, addressable by declared `outputvar`.
    pub step_vars: BTreeMap<String, Value>,
    /// Stack of working directories pushed by `cd` steps; `cwd_stack.last()`
    /// is the directory sub-processes run in.
    pub cwd_stack: Vec<PathBuf>,
    /// The working directory the process had when the run began, captured
    /// once, used to resolve `type: path` arguments before any `cd` runs.
    pub invocation_cwd: PathBuf,
    /// Extra environment variables merged into every spawned sub-process.
    pub env: BTreeMap<String, String>,
    /// The filesystem port actions and checks use for all file I/O.
    pub fs: Arc<dyn Filesystem>,
    /// Shared cancellation flag for this run and all its sub-TTPs.
    pub cancel: CancellationToken,
    /// If true, `execute()` is skipped and a synthetic empty output is
    /// returned; the cleanup stack is not drained.
    pub dry_run: bool,
    /// If true, the cleanup stack is not drained on top-level success.
    pub no_cleanup: bool,
    /// Delay between draining each cleanup frame (diagnostic aid).
    pub cleanup_delay: Duration,
    /// Current platform, exposed to templates as `platform.os`/`platform.arch`.
    pub platform: Platform,
    /// Repositories available for resolving `ttp:` sub-TTP references.
    /// `None` for a context built outside the CLI's repo-aware entry points,
    /// in which case a `ttp:` step fails instead of recursing.
    pub repos: Option<Arc<RepoCollection>>,
}

impl ExecutionContext {
    /// Build a fresh top-level context rooted at `workdir`.
    #[must_use]
    pub fn new(workdir: PathBuf, fs: Arc<dyn Filesystem>) -> Self {
        Self {
            args_bound: BTreeMap::new(),
            step_vars: BTreeMap::new(),
            cwd_stack: vec![workdir.clone()],
            invocation_cwd: workdir,
            env: BTreeMap::new(),
            fs,
            cancel: CancellationToken::new(),
            dry_run: false,
            no_cleanup: false,
            cleanup_delay: Duration::ZERO,
            platform: Platform::current(),
            repos: None,
        }
    }

    /// Build a child context for a sub-TTP step: fresh `step_vars`, shared
    /// cancellation token, same knobs and working directory.
    #[must_use]
    pub fn child(&self, args_bound: BTreeMap<String, ArgValue>) -> Self {
        Self {
            args_bound,
            step_vars: BTreeMap::new(),
            cwd_stack: self.cwd_stack.clone(),
            invocation_cwd: self.invocation_cwd.clone(),
            env: self.env.clone(),
            fs: self.fs.clone(),
            cancel: self.cancel.clone(),
            dry_run: self.dry_run,
            no_cleanup: self.no_cleanup,
            cleanup_delay: self.cleanup_delay,
            platform: self.platform,
            repos: self.repos.clone(),
        }
    }

    /// A minimal real-filesystem context for unit tests within this crate.
    #[cfg(test)]
    #[must_use]
    pub fn for_test() -> Self {
        Self::new(std::env::temp_dir(), Arc::new(OsFilesystem))
    }
}
