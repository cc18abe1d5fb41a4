//! taskfarm - distribute a command file across a pool of worker processes

mod cli;
mod commands;
mod error;
mod events;
mod handlers;
mod logging;
mod paths;
mod perf;
mod results;
mod scheduler;
mod serial;
mod task;
mod worker;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use tracing::{debug, info};

use cli::Cli;
use commands::CommandRegistry;
use logging::LogConfig;
use paths::OutputLayout;
use perf::RunMode;
use scheduler::SchedulerConfig;
use worker::WorkerConfig;

/// Program entry point: parses CLI arguments, runs the command file and
/// handles top-level errors.
///
/// On error, prints a colored error header followed by each cause in the
/// error chain before exiting with status code 1.
fn main() {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_verbosity(cli.verbose, cli.quiet).with_env_overrides();
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        log_config = log_config.with_file(paths::expand_tilde(path));
    }
    logging::init(log_config);

    if cli.internal_worker {
        worker::run_worker_main(cli.worker_id);
    }

    if let Err(e) = run(&cli) {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        // Print the error chain if there are causes
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Run the command file serially (`--jobs 1`) or on a pool of `jobs - 1`
/// workers, then append the elapsed time to the performance log.
fn run(cli: &Cli) -> Result<()> {
    let command_file = cli
        .command_file
        .as_deref()
        .context("No command file given")?;

    let output_dir = paths::expand_tilde(&cli.output_dir);
    std::fs::create_dir_all(&output_dir).with_context(|| {
        format!("Failed to create output directory {}", output_dir.display())
    })?;
    let layout = OutputLayout::new(output_dir);
    debug!(output_dir = %layout.dir().display(), jobs = cli.jobs, "Output layout ready");
    let registry = CommandRegistry::builtin();

    let start = Instant::now();
    let (mode, summary) = if cli.jobs < 2 {
        if !cli.quiet {
            println!("Starting serial server with one process.");
        }
        let summary = serial::run_serial(command_file, &layout, &registry)?;
        (RunMode::Serial, summary)
    } else {
        if !cli.quiet {
            println!("Starting parallel server with {} processes.", cli.jobs);
        }
        let config = SchedulerConfig {
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
        };
        let worker_config = WorkerConfig {
            verbose: cli.verbose,
            ..Default::default()
        };
        let summary = scheduler::run_pooled(
            command_file,
            cli.jobs - 1,
            &layout,
            &registry,
            config,
            &worker_config,
        )?;
        (RunMode::Parallel { processes: cli.jobs }, summary)
    };
    let elapsed = start.elapsed();

    perf::record_run(&layout.performance_log(), mode, elapsed)?;
    info!(
        tasks = summary.total,
        completed = summary.completed,
        skipped = summary.skipped,
        elapsed_secs = elapsed.as_secs_f64(),
        "Run finished"
    );
    Ok(())
}
