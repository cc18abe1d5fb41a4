//! Performance summary log, appended once per run.

use crate::error::{FarmError, Result};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// How a run was executed, for the summary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serial,
    /// Total process count, coordinator included.
    Parallel { processes: usize },
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Parallel { processes } => write!(f, "Parallel {}", processes),
        }
    }
}

/// Format one summary line, without the newline.
pub fn summary_line(mode: RunMode, elapsed: Duration) -> String {
    format!("{} Result: {:.6}", mode, elapsed.as_secs_f64())
}

/// Append the summary line for a finished run to the log at `path`.
pub fn record_run(path: &Path, mode: RunMode, elapsed: Duration) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| FarmError::LogFile {
            path: path.to_path_buf(),
            source,
        })?;
    writeln!(file, "{}", summary_line(mode, elapsed))?;
    Ok(())
}
