use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{error, info};
use ttpforge_core::{
    CancellationToken, Engine, ExecutionContext, Filesystem, Platform, RepoCollection, TestCase,
    TtpDocument,
};

use crate::cli::TestArgs;
use crate::commands::{current_dir, load_reference, parse_bound_args};
use crate::config::Runtime;
use crate::output::CliProgress;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn run(rt: Runtime, args: &TestArgs) -> Result<i32> {
    let repos = Arc::new(rt.repo_collection()?);
    let cwd = current_dir()?;
    let platform = Platform::current();
    let (doc, _bound) =
        load_reference(&repos, rt.fs.as_ref(), &args.reference, &parse_bound_args(&[])?, &cwd, &platform)?;

    if doc.preamble.tests.is_empty() {
        info!("`{}` declares no tests", doc.preamble.name);
        return Ok(0);
    }

    let mut failed = 0usize;
    for case in &doc.preamble.tests {
        let timeout = args
            .time_out_seconds
            .map(Duration::from_secs)
            .or_else(|| case.timeout_seconds.map(Duration::from_secs))
            .unwrap_or(DEFAULT_TIMEOUT);

        match run_case(&doc, case, &repos, rt.fs.clone(), &cwd, &platform, timeout) {
            Ok(()) => info!("PASS {}", case.name),
            Err(e) => {
                error!("FAIL {}: {e}", case.name);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        Err(anyhow!("{failed} of {} test case(s) failed", doc.preamble.tests.len()))
    } else {
        Ok(0)
    }
}

/// Run one declared test case on a background thread, imposing `timeout`
/// as a wall-clock deadline. Expiry cancels the run the same way an
/// operator interrupt does, then waits for the cooperative shutdown.
fn run_case(
    doc: &TtpDocument,
    case: &TestCase,
    repos: &Arc<RepoCollection>,
    fs: Arc<dyn Filesystem>,
    cwd: &std::path::Path,
    platform: &Platform,
    timeout: Duration,
) -> Result<()> {
    let bound = ttpforge_core::ArgBinder::bind(&doc.preamble.args, &case.args, cwd)
        .map_err(|e| anyhow!("binding args for `{}`: {e}", case.name))?;

    let doc = doc.clone();
    let dry_run = case.dry_run;
    let repos = repos.clone();
    let cwd = cwd.to_path_buf();
    let cancel = CancellationToken::new();
    let cancel_for_thread = cancel.clone();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut ctx = ExecutionContext::new(cwd, fs);
        ctx.args_bound = bound;
        ctx.repos = Some(repos);
        ctx.dry_run = dry_run;
        ctx.cancel = cancel_for_thread;
        let report = Engine.run_with_progress(&doc, &mut ctx, &CliProgress);
        let _ = tx.send(report);
    });

    let outcome = match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            cancel.cancel();
            return Err(anyhow!("timed out after {timeout:?}"));
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            return Err(anyhow!("worker thread exited without reporting a result"))
        }
    };

    let report = outcome.map_err(|e| anyhow!("{e}"))?;
    if report.skipped {
        return Ok(());
    }

    if let Some(expected) = &case.expected_stdout {
        let actual: String = report
            .steps
            .iter()
            .filter_map(|s| s.output.as_ref())
            .map(|o| o.stdout.as_str())
            .collect();
        if &actual != expected {
            return Err(anyhow!("stdout mismatch: expected {expected:?}, got {actual:?}"));
        }
    }
    Ok(())
}
