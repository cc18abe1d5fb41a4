//! Error types for taskfarm.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for taskfarm.
#[derive(Error, Debug)]
pub enum FarmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to open command file {}: {source}", path.display())]
    CommandFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker pool capacity exceeded: requested {requested} workers, maximum is {max}")]
    CapacityExceeded { requested: usize, max: usize },

    #[error("Worker pool needs at least one worker")]
    EmptyPool,

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Worker {id} exited unexpectedly: {reason}")]
    WorkerExited { id: usize, reason: String },
}

/// Result type alias for taskfarm operations.
pub type Result<T> = std::result::Result<T, FarmError>;
