//! Supervised external processes.

use std::ffi::OsStr;
use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Stage;
use super::output::{OutputSink, OutputStream, drain};
use crate::{Error, Result};

/// A running external process and the tasks draining its output.
///
/// Killing is a non-blocking request and idempotent. Dropping the handle kills
/// the process and stops the drains.
pub struct ProcessHandle {
    stage: Stage,
    pid: Option<u32>,
    child: Child,
    drains: Vec<JoinHandle<()>>,
    kill_requested: bool,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("stage", &self.stage)
            .field("pid", &self.pid)
            .field("kill_requested", &self.kill_requested)
            .finish()
    }
}

impl ProcessHandle {
    /// Spawn `program` with `args` and start draining stdout and stderr into `sink`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<I, S>(
        stage: Stage,
        program: impl AsRef<OsStr>,
        args: I,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = process_utils::supervised_command(program)
            .args(args)
            .spawn()
            .map_err(|source| Error::Spawn { stage, source })?;

        let pid = child.id();
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain(
                stage,
                OutputStream::Stdout,
                stdout,
                Arc::clone(&sink),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain(
                stage,
                OutputStream::Stderr,
                stderr,
                sink,
            )));
        }

        info!(%stage, pid = ?pid, "Process started");

        Ok(Self {
            stage,
            pid,
            child,
            drains,
            kill_requested: false,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the process to terminate. Does not wait for it to exit.
    pub fn kill(&mut self) {
        if self.kill_requested {
            return;
        }
        self.kill_requested = true;

        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        match self.child.start_kill() {
            Ok(()) => debug!(stage = %self.stage, pid = ?self.pid, "Kill requested"),
            Err(e) if process_utils::is_already_exited(&e) => {}
            Err(e) => warn!(stage = %self.stage, pid = ?self.pid, "Failed to kill process: {e}"),
        }
    }

    /// Whether the process has exited, without blocking.
    pub fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                if !self.kill_requested {
                    warn!(stage = %self.stage, pid = ?self.pid, %status, "Process exited");
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(stage = %self.stage, pid = ?self.pid, "Error polling process: {e}");
                false
            }
        }
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill();
        for task in &self.drains {
            task.abort();
        }
    }
}
