//! Lifecycle event log.
//!
//! Records `RECEIVED`, `DISPATCHED` and `COMPLETED` for each task, one line
//! per event, flushed as it is written:
//!
//! ```text
//! [2026-10-16 09:30:00] DISPATCHED | Client: C1 | Command: PRIMES | Worker: Worker 2
//! ```

use crate::error::{FarmError, Result};
use crate::task::Task;
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Received,
    Dispatched,
    Completed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "RECEIVED"),
            Self::Dispatched => write!(f, "DISPATCHED"),
            Self::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Who executed a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLabel {
    /// Pool member, numbered from 1.
    Pool(usize),
    /// The serial executor.
    Serial,
}

impl fmt::Display for WorkerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool(id) => write!(f, "Worker {}", id),
            Self::Serial => write!(f, "Worker Serial"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub client_id: String,
    pub command: String,
    pub worker: Option<WorkerLabel>,
    pub timestamp: DateTime<Local>,
}

impl LifecycleEvent {
    fn new(kind: EventKind, task: &Task, worker: Option<WorkerLabel>) -> Self {
        Self {
            kind,
            client_id: task.client_id.clone(),
            command: task.command.clone(),
            worker,
            timestamp: Local::now(),
        }
    }

    pub fn received(task: &Task) -> Self {
        Self::new(EventKind::Received, task, None)
    }

    pub fn dispatched(task: &Task, worker: WorkerLabel) -> Self {
        Self::new(EventKind::Dispatched, task, Some(worker))
    }

    pub fn completed(task: &Task, worker: WorkerLabel) -> Self {
        Self::new(EventKind::Completed, task, Some(worker))
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} | Client: {} | Command: {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.kind,
            self.client_id,
            self.command
        )?;
        if let Some(worker) = &self.worker {
            write!(f, " | Worker: {}", worker)?;
        }
        Ok(())
    }
}

/// Destination for lifecycle events.
pub trait EventSink {
    fn emit(&mut self, event: LifecycleEvent) -> Result<()>;
}

/// In-memory sink, handy for inspecting a run.
impl EventSink for Vec<LifecycleEvent> {
    fn emit(&mut self, event: LifecycleEvent) -> Result<()> {
        self.push(event);
        Ok(())
    }
}

/// Line-oriented event log over any writer.
pub struct EventLog<W: Write> {
    writer: W,
}

impl EventLog<BufWriter<File>> {
    /// Create (or truncate) the log file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|source| FarmError::LogFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> EventLog<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for EventLog<W> {
    fn emit(&mut self, event: LifecycleEvent) -> Result<()> {
        writeln!(self.writer, "{}", event)?;
        self.writer.flush()?;
        Ok(())
    }
}
