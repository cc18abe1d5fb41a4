//! Worker subprocess spawning.
//!
//! Workers are this same binary re-executed in `--internal-worker` mode, so
//! a pool member needs nothing installed beyond the coordinator itself.

use super::proc::Proc;
use crate::error::{FarmError, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// How to launch a worker process.
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    /// Executable to run; defaults to the current binary.
    pub program: Option<PathBuf>,
    /// Verbosity forwarded as repeated `-v` flags.
    pub verbose: u8,
}

impl WorkerConfig {
    fn program(&self) -> Result<PathBuf> {
        match &self.program {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(|e| {
                FarmError::Worker(format!("Failed to get current executable: {}", e))
            }),
        }
    }

    /// Arguments that put the binary into worker mode as worker `id`.
    pub fn args(&self, id: usize) -> Vec<String> {
        let mut args = vec![
            "--internal-worker".to_string(),
            "--worker-id".to_string(),
            id.to_string(),
        ];
        if self.verbose > 0 {
            args.push(format!("-{}", "v".repeat(usize::from(self.verbose))));
        }
        args
    }
}

/// Spawn worker `id` (1-based) with piped stdin/stdout and inherited stderr.
pub fn spawn_worker(id: usize, config: &WorkerConfig) -> Result<Proc> {
    let mut cmd = Command::new(config.program()?);
    cmd.args(config.args(id));

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit()); // Worker diagnostics go to the coordinator's stderr

    let child = cmd
        .spawn()
        .map_err(|e| FarmError::Worker(format!("Failed to spawn worker {}: {}", id, e)))?;

    Proc::from_child(id, child)
}
