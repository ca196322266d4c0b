//! Cancellable sub-process execution.
//!
//! Every action that shells out goes through [`spawn_and_wait`], which
//! places the child in its own process group on unix and signals the whole
//! group (not just the child) on cancellation, so that shell-launched
//! grandchildren terminate too.

use std::{
    io::{self, Read},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use log::{debug, trace, warn};

use crate::context::{CancellationToken, ExecutionContext};

/// Captured result of running a sub-process to completion.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit code; -1 if the process was killed by a signal.
    pub exit_code: i32,
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Run `sh -c <command>` (or `cmd.exe /c <command>` on Windows), honouring
/// the run's cancellation token.
pub fn run_capture(command: &str, ctx: &ExecutionContext) -> io::Result<CapturedOutput> {
    let mut cmd = platform_shell(command);
    run_command(&mut cmd, ctx)
}

/// Run an arbitrary already-built [`Command`], honouring the run's
/// cancellation token.
pub fn run_command(cmd: &mut Command, ctx: &ExecutionContext) -> io::Result<CapturedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = ctx.cwd_stack.last() {
        cmd.current_dir(dir);
    }
    for (k, v) in &ctx.env {
        cmd.env(k, v);
    }
    #[cfg(unix)]
    {
        // new process group rooted at the child's own pid
        cmd.process_group(0);
    }

    trace!("spawning: {cmd:?}");
    let mut child = cmd.spawn()?;
    let pid = child.id();

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_thread = thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout_pipe.take() {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_thread = thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr_pipe.take() {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });

    let status = wait_with_cancellation(&mut child, pid, &ctx.cancel)?;

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();

    let exit_code = status.map(|s| exit_code_of(&s)).unwrap_or(-1);

    Ok(CapturedOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
    })
}

fn wait_with_cancellation(
    child: &mut std::process::Child,
    pid: u32,
    cancel: &CancellationToken,
) -> io::Result<Option<std::process::ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if cancel.is_cancelled() {
            warn!("cancellation requested, signalling process group {pid}");
            signal_group(pid, Signal::Term);
            let deadline = Instant::now() + TERM_GRACE;
            loop {
                if let Some(status) = child.try_wait()? {
                    return Ok(Some(status));
                }
                if Instant::now() >= deadline {
                    signal_group(pid, Signal::Kill);
                    let _ = child.wait();
                    return Ok(None);
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Signal a process or process group by pid. Used directly by the
/// `kill_process` action and internally for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM / graceful termination request
    Term,
    /// SIGKILL / forceful termination
    Kill,
}

#[cfg(unix)]
pub fn signal_group(pid: u32, signal: Signal) {
    use nix::{
        sys::signal::{self, Signal as NixSignal},
        unistd::Pid,
    };
    let nix_signal = match signal {
        Signal::Term => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    // negative pid targets the whole process group
    let group = Pid::from_raw(-(pid as i32));
    if let Err(e) = signal::kill(group, nix_signal) {
        debug!("failed to signal process group {pid}: {e}");
    }
}

#[cfg(not(unix))]
pub fn signal_group(pid: u32, signal: Signal) {
    // Windows has no process-group signalling primitive matching unix
    // semantics; best effort is to kill the immediate child.
    let _ = signal;
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .status();
}

#[cfg(unix)]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.code().unwrap_or_else(|| -status.signal().unwrap_or(1))
}

#[cfg(not(unix))]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn platform_shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd.exe");
        cmd.arg("/c").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;

    #[test]
    fn captures_stdout_and_exit_code() {
        let ctx = ExecutionContext::for_test();
        let out = run_capture("echo hello", &ctx).unwrap();
        assert_eq!(out.stdout.trim_end(), "hello");
        assert_eq!(out.exit_code, 0);
    }

    #[test]
    fn captures_nonzero_exit_code() {
        let ctx = ExecutionContext::for_test();
        let out = run_capture("exit 3", &ctx).unwrap();
        assert_eq!(out.exit_code, 3);
    }

    #[test]
    fn cancellation_terminates_a_sleeping_process() {
        let ctx = ExecutionContext::for_test();
        let cancel = ctx.cancel.clone();
        let handle = thread::spawn(move || run_capture("sleep 30", &ctx));
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
        let start = Instant::now();
        let out = handle.join().unwrap().unwrap();
        assert!(start.elapsed() < TERM_GRACE + Duration::from_secs(2));
        assert_ne!(out.exit_code, 0);
    }
}
