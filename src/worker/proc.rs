//! Process handle for worker subprocesses.
//!
//! Wraps a child process with IPC channels for communication.

use super::ipc::{LineReader, LineStatus, LineWriter, PipeFd};
use super::pool::WorkerLink;
use super::protocol::{WorkRequest, WorkResponse};
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{FarmError, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::os::fd::OwnedFd;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long a worker gets to exit after the termination sentinel.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a worker subprocess with IPC channels.
pub struct Proc {
    /// Worker identity (1-based), for messages.
    id: usize,
    pid: Pid,
    writer: LineWriter,
    reader: LineReader,
    reaped: bool,
}

impl Proc {
    pub fn new(id: usize, pid: Pid, stdin: PipeFd, stdout: PipeFd) -> Self {
        Self {
            id,
            pid,
            writer: LineWriter::new(stdin),
            reader: LineReader::new(stdout),
            reaped: false,
        }
    }

    /// Create from a spawned `std::process::Child`, taking its stdin and stdout.
    pub fn from_child(id: usize, mut child: std::process::Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FarmError::Worker(format!("Worker {} stdin not captured", id)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FarmError::Worker(format!("Worker {} stdout not captured", id)))?;

        Ok(Self::new(
            id,
            pid,
            PipeFd::new(OwnedFd::from(stdin)),
            PipeFd::new(OwnedFd::from(stdout)),
        ))
    }

    /// Try to wait for the process (non-blocking).
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Result<Option<WaitStatus>> {
        if self.reaped {
            return Err(FarmError::Worker(format!(
                "Worker {} already reaped",
                self.id
            )));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.reaped = true;
                Ok(Some(status))
            }
            Err(e) => Err(FarmError::Worker(format!("waitpid failed: {}", e))),
        }
    }

    /// Poll for exit until `timeout` elapses.
    fn wait_timeout(&mut self, timeout: Duration) -> Option<WaitStatus> {
        let start = Instant::now();
        loop {
            if let Ok(Some(status)) = self.try_wait() {
                return Some(status);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Send SIGKILL and reap.
    fn kill(&mut self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGKILL)
            .map_err(|e| FarmError::Worker(format!("Failed to send SIGKILL: {}", e)))?;
        waitpid(self.pid, None)
            .map_err(|e| FarmError::Worker(format!("waitpid failed: {}", e)))?;
        self.reaped = true;
        Ok(())
    }

    /// Explain a closed pipe, giving the process a moment to finish exiting.
    fn exit_reason(&mut self) -> TerminationReason {
        if self.reaped {
            return TerminationReason::Unknown;
        }
        self.wait_timeout(Duration::from_millis(100))
            .map(analyze_wait_status)
            .unwrap_or(TerminationReason::StillAlive)
    }
}

impl WorkerLink for Proc {
    fn send(&mut self, request: &WorkRequest) -> Result<()> {
        let line = request.to_line()?;
        self.writer.write_line(&line).map_err(|e| {
            FarmError::Worker(format!("Failed to send to worker {}: {}", self.id, e))
        })
    }

    fn try_recv(&mut self) -> Result<Option<WorkResponse>> {
        let status = self.reader.poll_line().map_err(|e| {
            FarmError::Worker(format!("Failed to receive from worker {}: {}", self.id, e))
        })?;
        match status {
            LineStatus::Ready(line) => Ok(Some(WorkResponse::from_line(&line)?)),
            LineStatus::Pending => Ok(None),
            LineStatus::Closed => Err(FarmError::WorkerExited {
                id: self.id,
                reason: self.exit_reason().to_string(),
            }),
        }
    }

    /// Send the termination sentinel, then reap. A worker that ignores the
    /// sentinel for [`STOP_TIMEOUT`] is killed.
    fn terminate(&mut self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        self.send(&WorkRequest::terminate())?;

        match self.wait_timeout(STOP_TIMEOUT) {
            Some(status) => {
                let reason = analyze_wait_status(status);
                if reason.is_success() {
                    debug!(worker_id = self.id, pid = %self.pid, "Worker exited");
                } else {
                    warn!(worker_id = self.id, reason = %reason, "Worker exited abnormally");
                }
                Ok(())
            }
            None => {
                warn!(
                    worker_id = self.id,
                    timeout_secs = STOP_TIMEOUT.as_secs(),
                    "Worker ignored termination, killing"
                );
                self.kill()
            }
        }
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
            self.reaped = true;
        }
    }
}
