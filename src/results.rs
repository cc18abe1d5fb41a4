//! Per-client result files.

use crate::error::Result;
use crate::paths::{ExecutionMode, OutputLayout};
use crate::task::Task;
use std::fs;
use tracing::debug;

/// Outcome of one completed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub client_id: String,
    pub command: String,
    pub text: String,
}

impl TaskResult {
    pub fn new(task: &Task, text: impl Into<String>) -> Self {
        Self {
            client_id: task.client_id.clone(),
            command: task.command.clone(),
            text: text.into(),
        }
    }
}

/// Destination for task results.
///
/// Callers treat a failed write as a diagnostic: the task still counts as
/// completed.
pub trait ResultSink {
    fn record(&mut self, result: &TaskResult) -> Result<()>;
}

impl ResultSink for Vec<TaskResult> {
    fn record(&mut self, result: &TaskResult) -> Result<()> {
        self.push(result.clone());
        Ok(())
    }
}

/// Rejects every write, counting the attempts.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FailingResults {
    pub attempts: usize,
}

#[cfg(test)]
impl ResultSink for FailingResults {
    fn record(&mut self, _: &TaskResult) -> Result<()> {
        self.attempts += 1;
        Err(crate::error::FarmError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only output directory",
        )))
    }
}

/// Writes `Result: <text>` to one file per client, replacing earlier content.
pub struct ClientResultFiles {
    layout: OutputLayout,
    mode: ExecutionMode,
}

impl ClientResultFiles {
    pub fn new(layout: OutputLayout, mode: ExecutionMode) -> Self {
        Self { layout, mode }
    }
}

impl ResultSink for ClientResultFiles {
    fn record(&mut self, result: &TaskResult) -> Result<()> {
        let path = self.layout.client_result(&result.client_id, self.mode);
        fs::write(&path, format!("Result: {}\n", result.text))?;
        debug!(client = %result.client_id, command = %result.command, path = %path.display(), "Result written");
        Ok(())
    }
}
