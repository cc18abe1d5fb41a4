//! Output file layout.
//!
//! Every file a run produces lives under one output directory. The pooled
//! and serial paths use different names so their outputs never collide.

use std::path::{Path, PathBuf};

/// Appended to across runs.
pub const PERFORMANCE_LOG_FILENAME: &str = "PERFORMANCE_LOG.txt";

/// Which driver produced a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Pooled,
    Serial,
}

impl ExecutionMode {
    fn event_log_name(self) -> &'static str {
        match self {
            Self::Pooled => "SERVER_LOG.txt",
            Self::Serial => "SERVER_SERIAL_LOG.txt",
        }
    }

    fn client_suffix(self) -> &'static str {
        match self {
            Self::Pooled => "_LOG.txt",
            Self::Serial => "_SERIAL_LOG.txt",
        }
    }
}

/// Names the files written under an output directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    dir: PathBuf,
}

impl OutputLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lifecycle event log for a run in `mode`.
    pub fn event_log(&self, mode: ExecutionMode) -> PathBuf {
        self.dir.join(mode.event_log_name())
    }

    /// Result file for `client_id`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let layout = OutputLayout::new("/tmp/run");
    /// assert_eq!(
    ///     layout.client_result("C1", ExecutionMode::Serial),
    ///     PathBuf::from("/tmp/run/C1_SERIAL_LOG.txt"),
    /// );
    /// ```
    pub fn client_result(&self, client_id: &str, mode: ExecutionMode) -> PathBuf {
        self.dir
            .join(format!("{}{}", client_id, mode.client_suffix()))
    }

    pub fn performance_log(&self) -> PathBuf {
        self.dir.join(PERFORMANCE_LOG_FILENAME)
    }
}

/// Expands a leading `~` in a path to the user's home directory.
///
/// Covers `--output-dir=~/runs`, where the shell leaves the tilde alone.
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    path.to_path_buf()
}
