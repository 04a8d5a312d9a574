// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Launching and supervising one subprocess attempt.
//!
//! Each attempt owns three cooperating tasks: the OS child, a reader
//! draining the status pipe, and the waiter that reaps the child. The
//! waiter never evaluates the outcome before the reader has hit EOF, so the
//! last progress record always precedes the terminal status.

use crate::classify::{classify, stderr_has_error_sentinel};
use crate::error::Error;
use crate::output::BoundedBuffer;
use crate::progress;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::task::JoinHandle;
use upkeepd_core::{Indicator, JobId, SystemError};

/// Captured outcome of one finished attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    /// Exit code, or -1 when the child died to a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Terminal evaluation of an attempt.
#[derive(Debug, PartialEq)]
pub enum Verdict {
    Succeeded,
    Failed(SystemError),
}

/// Caller-supplied exit inspection. Returning `Some(err)` overrides the
/// default success/classify evaluation with that failure.
pub type AtExitFn = Box<dyn Fn(&CommandResult) -> Option<SystemError> + Send + Sync>;

/// Live, shared view of a running attempt. This is what abort requests
/// operate on.
#[derive(Debug)]
pub(crate) struct RunState {
    cancelable: AtomicBool,
    force_failed: AtomicBool,
    pgid: Mutex<Option<Pid>>,
}

impl RunState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            // cancelable until a pmstatus record says otherwise
            cancelable: AtomicBool::new(true),
            force_failed: AtomicBool::new(false),
            pgid: Mutex::new(None),
        })
    }

    /// The latest cancelable flag observed on the status stream.
    pub(crate) fn cancelable(&self) -> bool {
        self.cancelable.load(Ordering::SeqCst)
    }

    pub(crate) fn set_cancelable(&self, value: bool) {
        self.cancelable.store(value, Ordering::SeqCst);
    }

    /// Force the terminal status to `Failed(Aborted)` regardless of how the
    /// child exits.
    pub(crate) fn mark_force_failed(&self) {
        self.force_failed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn force_failed(&self) -> bool {
        self.force_failed.load(Ordering::SeqCst)
    }

    /// Deliver SIGINT to the child's process group.
    pub(crate) fn interrupt(&self) -> std::io::Result<()> {
        let pgid = self.pgid.lock();
        match *pgid {
            Some(pid) => killpg(pid, Signal::SIGINT).map_err(std::io::Error::from),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no live process to interrupt",
            )),
        }
    }
}

/// Everything needed to spawn one attempt.
#[derive(Debug, Clone)]
pub(crate) struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    /// Descriptor number the child writes status lines to.
    pub status_fd: i32,
    pub capture_limit: usize,
}

/// A spawned attempt: the child plus its reader and capture tasks.
#[derive(Debug)]
pub(crate) struct Launched {
    child: tokio::process::Child,
    reader: JoinHandle<()>,
    stdout_task: JoinHandle<BoundedBuffer>,
    stderr_task: JoinHandle<BoundedBuffer>,
    state: Arc<RunState>,
}

/// Fork/exec the attempt. Errors here are synchronous: nothing was spawned
/// and no status is emitted.
pub(crate) fn launch(
    job_id: &JobId,
    spec: &CommandSpec,
    state: Arc<RunState>,
    sink: Indicator,
) -> Result<Launched, Error> {
    let (pipe_r, pipe_w) = nix::unistd::pipe().map_err(std::io::Error::from)?;

    let mut cmd = tokio::process::Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    for (key, value) in &spec.envs {
        cmd.env(key, value);
    }

    let status_fd = spec.status_fd;
    let write_fd = pipe_w.as_raw_fd();
    unsafe {
        cmd.pre_exec(move || {
            // map the pipe's write end onto the descriptor the child was
            // told about via APT::Status-Fd
            if nix::libc::dup2(write_fd, status_fd) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    tracing::debug!(
        job_id = %job_id,
        program = %spec.program.display(),
        args = ?spec.args,
        "spawning command"
    );
    let mut child = cmd.spawn().map_err(|source| Error::Spawn {
        program: spec.program.display().to_string(),
        source,
    })?;
    // the child holds its own copy now; keeping ours would delay EOF forever
    drop(pipe_w);

    *state.pgid.lock() = child.id().map(|pid| Pid::from_raw(pid as i32));

    let receiver = pipe::Receiver::from_owned_fd(pipe_r)?;
    let reader = tokio::spawn(read_status_lines(receiver, job_id.clone(), state.clone(), sink));

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(capture(stdout, spec.capture_limit));
    let stderr_task = tokio::spawn(capture(stderr, spec.capture_limit));

    Ok(Launched { child, reader, stdout_task, stderr_task, state })
}

impl Launched {
    /// Reap the child, then drain the status pipe and output captures.
    pub(crate) async fn wait(mut self) -> CommandResult {
        let status = self.child.wait().await;
        // EOF-drain barrier: the last progress record must reach the sink
        // before the caller evaluates the terminal status
        let _ = self.reader.await;
        let stdout = self.stdout_task.await.unwrap_or_default();
        let stderr = self.stderr_task.await.unwrap_or_default();
        *self.state.pgid.lock() = None;

        let exit_code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(err) => {
                tracing::warn!(%err, "wait on child failed");
                -1
            }
        };
        CommandResult {
            exit_code,
            stdout: stdout.contents(),
            stderr: stderr.contents(),
        }
    }
}

/// Terminal evaluation: forced abort, then the exit hook, then the default
/// success check, then classification.
pub(crate) fn evaluate(
    result: &CommandResult,
    force_failed: bool,
    at_exit: Option<&AtExitFn>,
) -> Verdict {
    if force_failed {
        return Verdict::Failed(SystemError::Aborted);
    }
    if let Some(hook) = at_exit {
        if let Some(err) = hook(result) {
            return Verdict::Failed(err);
        }
    }
    if result.exit_code == 0 && !stderr_has_error_sentinel(&result.stderr) {
        return Verdict::Succeeded;
    }
    match classify(&result.stdout, &result.stderr) {
        Some(err) => Verdict::Failed(err),
        None => Verdict::Failed(SystemError::Unknown {
            detail: format!("process exited with code {}", result.exit_code),
        }),
    }
}

async fn read_status_lines(
    receiver: pipe::Receiver,
    job_id: JobId,
    state: Arc<RunState>,
    sink: Indicator,
) {
    let mut lines = BufReader::new(receiver).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match progress::parse_line(&job_id, &line) {
                Ok(record) => {
                    state.set_cancelable(record.cancelable);
                    sink(record);
                }
                Err(err) => {
                    tracing::warn!(job_id = %job_id, %err, "skipping unparseable progress line");
                }
            },
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(job_id = %job_id, %err, "status pipe read failed");
                break;
            }
        }
    }
}

async fn capture<R>(stream: Option<R>, limit: usize) -> BoundedBuffer
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let mut buf = BoundedBuffer::new(limit);
    let Some(mut stream) = stream else {
        return buf;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buf.extend(&chunk[..n]),
            Err(err) => {
                tracing::debug!(%err, "output capture ended early");
                break;
            }
        }
    }
    buf
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
