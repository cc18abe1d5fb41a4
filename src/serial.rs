//! Single-process fallback.
//!
//! Executes the command file line by line without a pool, honoring `WAIT`
//! directives. Emits the same lifecycle events as the pooled path, with the
//! `Worker Serial` label. An unknown command is still received and
//! dispatched here; it only lacks the completion.

use crate::commands::{CommandRegistry, UNKNOWN_COMMAND};
use crate::error::Result;
use crate::events::{EventLog, EventSink, LifecycleEvent, WorkerLabel};
use crate::paths::{ExecutionMode, OutputLayout};
use crate::results::{ClientResultFiles, ResultSink, TaskResult};
use crate::scheduler::RunSummary;
use crate::task::{Directive, Task, open_command_file, parse_raw_line, raw_lines};
use std::io::BufRead;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct SerialExecutor<'a> {
    registry: &'a CommandRegistry,
    events: &'a mut dyn EventSink,
    results: &'a mut dyn ResultSink,
    pause: Box<dyn FnMut(Duration) + 'a>,
}

impl<'a> SerialExecutor<'a> {
    pub fn new(
        registry: &'a CommandRegistry,
        events: &'a mut dyn EventSink,
        results: &'a mut dyn ResultSink,
    ) -> Self {
        Self {
            registry,
            events,
            results,
            pause: Box::new(thread::sleep),
        }
    }

    /// Replace how `WAIT` pauses are carried out.
    pub fn with_pause(mut self, pause: impl FnMut(Duration) + 'a) -> Self {
        self.pause = Box::new(pause);
        self
    }

    /// Process every line of a command file in order.
    pub fn process<R: BufRead>(&mut self, reader: R) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for (index, line) in raw_lines(reader).enumerate() {
            let line = line?;
            match parse_raw_line(&line) {
                Ok(Some(Directive::Wait(duration))) => {
                    debug!(seconds = duration.as_secs(), "Pausing");
                    (self.pause)(duration);
                }
                Ok(Some(Directive::Task(task))) => self.execute(&task, &mut summary)?,
                Ok(None) => {}
                Err(e) => warn!(line = index + 1, error = %e, "Skipping malformed line"),
            }
        }

        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            "All tasks finished"
        );
        Ok(summary)
    }

    fn execute(&mut self, task: &Task, summary: &mut RunSummary) -> Result<()> {
        summary.total += 1;
        summary.dispatched += 1;

        self.events.emit(LifecycleEvent::received(task))?;
        self.events
            .emit(LifecycleEvent::dispatched(task, WorkerLabel::Serial))?;

        // Unknown commands never complete
        let Some(tag) = self.registry.resolve(&task.command) else {
            warn!(
                client = %task.client_id,
                command = %task.command,
                "Unknown command, skipping task"
            );
            summary.skipped += 1;
            return Ok(());
        };

        let text = self
            .registry
            .execute(tag, &task.parameter)
            .unwrap_or_else(|| UNKNOWN_COMMAND.to_string());

        self.events
            .emit(LifecycleEvent::completed(task, WorkerLabel::Serial))?;
        if let Err(e) = self.results.record(&TaskResult::new(task, text)) {
            warn!(client = %task.client_id, error = %e, "Failed to write result");
        }
        summary.completed += 1;
        Ok(())
    }
}

/// Run a command file in this process, writing the serial event log and
/// result files under `layout`.
pub fn run_serial(
    command_file: &Path,
    layout: &OutputLayout,
    registry: &CommandRegistry,
) -> Result<RunSummary> {
    let reader = open_command_file(command_file)?;
    let mut events = EventLog::create(&layout.event_log(ExecutionMode::Serial))?;
    let mut results = ClientResultFiles::new(layout.clone(), ExecutionMode::Serial);

    SerialExecutor::new(registry, &mut events, &mut results).process(reader)
}
