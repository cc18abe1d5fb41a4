//! Command-line interface definitions using clap.

use crate::logging::LogFormat;
use crate::worker::MAX_WORKERS;
use std::path::PathBuf;

use clap::Parser;
use clap::builder::RangedU64ValueParser;

/// Distribute a file of tasks across a pool of worker processes.
#[derive(Parser, Debug)]
#[command(name = "taskfarm")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command file: one `<client> <command> <parameter>` or `WAIT <secs>` per line.
    #[arg(required_unless_present = "internal_worker")]
    pub command_file: Option<PathBuf>,

    /// Total number of processes; 1 runs everything serially in this process.
    /// Defaults to the CPU count, capped at the largest pool.
    #[arg(
        short,
        long,
        env = "TASKFARM_JOBS",
        default_value_t = default_jobs(),
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub jobs: usize,

    /// Directory for the event log, result files and performance log.
    #[arg(long, env = "TASKFARM_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Milliseconds to back off when no worker has replied (0 = just yield).
    #[arg(long, default_value_t = 1)]
    pub poll_interval_ms: u64,

    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Diagnostic log format (pretty, compact, json).
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Also write diagnostics to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Run as a pool worker speaking the IPC protocol on stdin/stdout.
    #[arg(long, hide = true)]
    pub internal_worker: bool,

    /// Worker identity, used in diagnostics.
    #[arg(long, hide = true, requires = "internal_worker", default_value_t = 0)]
    pub worker_id: usize,
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// One coordinator plus at most [`MAX_WORKERS`] workers.
fn default_jobs() -> usize {
    clamp_jobs(num_cpus())
}

fn clamp_jobs(cpus: usize) -> usize {
    cpus.min(MAX_WORKERS + 1)
}
