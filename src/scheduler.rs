//! Poll-driven coordinator loop.
//!
//! The scheduler owns the task queue and the worker pool. Each iteration
//! first collects replies from busy workers, then hands the next queued
//! tasks to free workers, lowest slot first. Nothing in the loop waits on an
//! individual worker; when an iteration makes no progress the loop backs off
//! for the configured poll interval.

use crate::commands::CommandRegistry;
use crate::error::Result;
use crate::events::{EventLog, EventSink, LifecycleEvent, WorkerLabel};
use crate::paths::{ExecutionMode, OutputLayout};
use crate::results::{ClientResultFiles, ResultSink, TaskResult};
use crate::task::{Task, load_tasks};
use crate::worker::{WorkResponse, WorkerConfig, WorkerLink, WorkerPool, check_capacity};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Scheduler tuning.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Back-off between idle iterations. Zero yields the thread instead.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    /// Tasks taken off the queue, skipped ones included.
    pub dispatched: usize,
    pub completed: usize,
    /// Tasks whose command did not resolve.
    pub skipped: usize,
}

pub struct Scheduler<'a, L: WorkerLink> {
    pool: WorkerPool<L>,
    registry: &'a CommandRegistry,
    events: &'a mut dyn EventSink,
    results: &'a mut dyn ResultSink,
    config: SchedulerConfig,
}

impl<'a, L: WorkerLink> Scheduler<'a, L> {
    pub fn new(
        pool: WorkerPool<L>,
        registry: &'a CommandRegistry,
        events: &'a mut dyn EventSink,
        results: &'a mut dyn ResultSink,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            events,
            results,
            config,
        }
    }

    /// Run every task to completion, then terminate the pool.
    pub fn run(self, tasks: &[Task]) -> Result<RunSummary> {
        let Self {
            mut pool,
            registry,
            events,
            results,
            config,
        } = self;

        let mut summary = RunSummary {
            total: tasks.len(),
            ..Default::default()
        };
        info!(tasks = tasks.len(), workers = pool.len(), "Scheduling tasks");

        while summary.completed + summary.skipped < summary.total {
            let mut progressed = false;

            // Collect replies from busy workers
            for slot in pool.slots_mut() {
                let Some((index, response)) = slot.poll()? else {
                    continue;
                };
                let task = &tasks[index];
                let text = match response {
                    WorkResponse::Result { text } => text,
                    WorkResponse::Error { message } => {
                        warn!(worker_id = slot.id(), client = %task.client_id, %message, "Worker reported an error");
                        message
                    }
                };
                if let Err(e) = results.record(&TaskResult::new(task, text)) {
                    warn!(client = %task.client_id, error = %e, "Failed to write result");
                }
                events.emit(LifecycleEvent::completed(task, WorkerLabel::Pool(slot.id())))?;
                summary.completed += 1;
                progressed = true;
            }

            // Hand queued tasks to free workers, lowest slot first
            for slot in pool.slots_mut() {
                if !slot.is_free() {
                    continue;
                }
                while summary.dispatched < tasks.len() {
                    let index = summary.dispatched;
                    let task = &tasks[index];
                    summary.dispatched += 1;
                    progressed = true;

                    let Some(tag) = registry.resolve(&task.command) else {
                        warn!(
                            client = %task.client_id,
                            command = %task.command,
                            "Unknown command, skipping task"
                        );
                        summary.skipped += 1;
                        continue;
                    };

                    events.emit(LifecycleEvent::received(task))?;
                    slot.assign(index, tag, &task.parameter)?;
                    events.emit(LifecycleEvent::dispatched(task, WorkerLabel::Pool(slot.id())))?;
                    debug!(worker_id = slot.id(), task = index, command = %task.command, "Dispatched");
                    break;
                }
            }

            if !progressed {
                if config.poll_interval.is_zero() {
                    thread::yield_now();
                } else {
                    thread::sleep(config.poll_interval);
                }
            }
        }

        let stats = pool.shutdown()?;
        debug!(
            workers = stats.worker_count,
            jobs = stats.total_jobs_completed,
            jobs_per_worker = ?stats.jobs_per_worker,
            "Pool shut down"
        );
        info!(
            dispatched = summary.dispatched,
            completed = summary.completed,
            skipped = summary.skipped,
            "All tasks finished"
        );
        Ok(summary)
    }
}

/// Run a command file on a pool of `workers` processes, writing the event
/// log and result files under `layout`.
pub fn run_pooled(
    command_file: &Path,
    workers: usize,
    layout: &OutputLayout,
    registry: &CommandRegistry,
    config: SchedulerConfig,
    worker_config: &WorkerConfig,
) -> Result<RunSummary> {
    check_capacity(workers)?;
    let tasks = load_tasks(command_file)?;

    let mut events = EventLog::create(&layout.event_log(ExecutionMode::Pooled))?;
    let mut results = ClientResultFiles::new(layout.clone(), ExecutionMode::Pooled);
    let pool = WorkerPool::spawn(workers, worker_config)?;

    Scheduler::new(pool, registry, &mut events, &mut results, config).run(&tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FarmError;
    use crate::events::EventKind;
    use crate::results::FailingResults;
    use crate::serial::SerialExecutor;
    use crate::worker::WorkRequest;
    use crate::worker::worker_main::WorkerLoop;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Traffic {
        Sent(usize, WorkRequest),
        Terminated(usize),
    }

    type TrafficLog = Rc<RefCell<Vec<Traffic>>>;

    /// Echoes `tag:parameter` after a fixed number of empty polls and
    /// panics if handed a task while one is outstanding.
    struct ScriptedLink {
        id: usize,
        log: TrafficLog,
        delay: usize,
        pending_tag: Option<u32>,
        reply: Option<(usize, WorkResponse)>,
    }

    impl ScriptedLink {
        fn new(id: usize, log: &TrafficLog, delay: usize) -> Self {
            Self {
                id,
                log: Rc::clone(log),
                delay,
                pending_tag: None,
                reply: None,
            }
        }
    }

    impl WorkerLink for ScriptedLink {
        fn send(&mut self, request: &WorkRequest) -> Result<()> {
            assert!(self.reply.is_none(), "worker {} assigned while busy", self.id);
            self.log.borrow_mut().push(Traffic::Sent(self.id, request.clone()));
            match request {
                WorkRequest::Tag { tag } => self.pending_tag = Some(tag.0),
                WorkRequest::Parameter { value } => {
                    let tag = self.pending_tag.take().expect("parameter before tag");
                    let text = format!("{}:{}", tag, value);
                    self.reply = Some((self.delay, WorkResponse::result(text)));
                }
            }
            Ok(())
        }

        fn try_recv(&mut self) -> Result<Option<WorkResponse>> {
            match self.reply.take() {
                Some((0, response)) => Ok(Some(response)),
                Some((remaining, response)) => {
                    self.reply = Some((remaining - 1, response));
                    Ok(None)
                }
                None => Ok(None),
            }
        }

        fn terminate(&mut self) -> Result<()> {
            self.log.borrow_mut().push(Traffic::Terminated(self.id));
            Ok(())
        }
    }

    /// Runs the real worker state machine in-process.
    struct LoopbackLink<'r> {
        machine: WorkerLoop<'r>,
        outbox: VecDeque<WorkResponse>,
    }

    impl WorkerLink for LoopbackLink<'_> {
        fn send(&mut self, request: &WorkRequest) -> Result<()> {
            if let Some(reply) = self.machine.handle(request.clone()) {
                self.outbox.push_back(reply);
            }
            Ok(())
        }

        fn try_recv(&mut self) -> Result<Option<WorkResponse>> {
            Ok(self.outbox.pop_front())
        }

        fn terminate(&mut self) -> Result<()> {
            self.machine.handle(WorkRequest::terminate());
            assert!(self.machine.is_terminated());
            Ok(())
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::ZERO,
        }
    }

    fn scripted_pool(workers: usize, delay: usize, log: &TrafficLog) -> WorkerPool<ScriptedLink> {
        WorkerPool::new(
            (1..=workers)
                .map(|id| ScriptedLink::new(id, log, delay + id))
                .collect(),
        )
        .unwrap()
    }

    fn tasks(n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| Task::new(format!("C{}", i), "PRIMES", i.to_string()))
            .collect()
    }

    fn run_scripted(
        workers: usize,
        tasks: &[Task],
        log: &TrafficLog,
    ) -> (Result<RunSummary>, Vec<LifecycleEvent>, Vec<TaskResult>) {
        let registry = CommandRegistry::builtin();
        let mut events = Vec::new();
        let mut results = Vec::new();
        let summary = Scheduler::new(
            scripted_pool(workers, 1, log),
            &registry,
            &mut events,
            &mut results,
            config(),
        )
        .run(tasks);
        (summary, events, results)
    }

    #[test]
    fn test_every_task_completes_once() {
        let log = TrafficLog::default();
        let tasks = tasks(10);
        let (summary, events, results) = run_scripted(3, &tasks, &log);

        assert_eq!(
            summary.unwrap(),
            RunSummary {
                total: 10,
                dispatched: 10,
                completed: 10,
                skipped: 0
            }
        );
        let completed = events
            .iter()
            .filter(|e| e.kind == EventKind::Completed)
            .count();
        assert_eq!(completed, 10);

        let mut clients: Vec<_> = results.iter().map(|r| r.client_id.clone()).collect();
        clients.sort();
        let mut expected: Vec<_> = tasks.iter().map(|t| t.client_id.clone()).collect();
        expected.sort();
        assert_eq!(clients, expected);
    }

    #[test]
    fn test_prefers_lowest_free_slot() {
        let log = TrafficLog::default();
        let (summary, events, _) = run_scripted(4, &tasks(2), &log);
        summary.unwrap();

        let labels: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::Dispatched)
            .map(|e| e.worker)
            .collect();
        assert_eq!(
            labels,
            vec![Some(WorkerLabel::Pool(1)), Some(WorkerLabel::Pool(2))]
        );
    }

    #[test]
    fn test_events_follow_lifecycle_order() {
        let log = TrafficLog::default();
        let (summary, events, _) = run_scripted(2, &tasks(5), &log);
        summary.unwrap();

        for client in (0..5).map(|i| format!("C{}", i)) {
            let kinds: Vec<_> = events
                .iter()
                .filter(|e| e.client_id == client)
                .map(|e| e.kind)
                .collect();
            assert_eq!(
                kinds,
                vec![EventKind::Received, EventKind::Dispatched, EventKind::Completed]
            );
        }
    }

    #[test]
    fn test_terminates_each_worker_once_after_all_work() {
        let log = TrafficLog::default();
        let (summary, _, _) = run_scripted(3, &tasks(7), &log);
        summary.unwrap();

        let traffic = log.borrow();
        let first_termination = traffic
            .iter()
            .position(|t| matches!(t, Traffic::Terminated(_)))
            .unwrap();
        assert!(
            traffic[first_termination..]
                .iter()
                .all(|t| matches!(t, Traffic::Terminated(_)))
        );
        let mut terminated: Vec<_> = traffic[first_termination..]
            .iter()
            .map(|t| match t {
                Traffic::Terminated(id) => *id,
                Traffic::Sent(..) => unreachable!(),
            })
            .collect();
        terminated.sort();
        assert_eq!(terminated, vec![1, 2, 3]);
    }

    #[test]
    fn test_sends_tag_before_parameter() {
        let log = TrafficLog::default();
        let (summary, _, _) = run_scripted(1, &[Task::new("C1", "PRIMEDIVISORS", "30")], &log);
        summary.unwrap();

        assert_eq!(
            log.borrow()[..2],
            [
                Traffic::Sent(1, WorkRequest::tag(crate::commands::DispatchTag::PRIME_DIVISORS)),
                Traffic::Sent(1, WorkRequest::parameter("30")),
            ]
        );
    }

    #[test]
    fn test_empty_task_list_still_terminates_pool() {
        let log = TrafficLog::default();
        let (summary, events, results) = run_scripted(2, &[], &log);

        assert_eq!(summary.unwrap(), RunSummary::default());
        assert!(events.is_empty());
        assert!(results.is_empty());
        assert_eq!(
            *log.borrow(),
            vec![Traffic::Terminated(1), Traffic::Terminated(2)]
        );
    }

    #[test]
    fn test_unknown_command_is_skipped() {
        let log = TrafficLog::default();
        let tasks = vec![
            Task::new("C1", "FOO", "bar"),
            Task::new("C2", "PRIMES", "10"),
        ];
        let (summary, events, results) = run_scripted(1, &tasks, &log);

        let summary = summary.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.completed, 1);
        assert!(events.iter().all(|e| e.client_id != "C1"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].client_id, "C2");
    }

    #[test]
    fn test_only_unknown_commands_finishes() {
        let log = TrafficLog::default();
        let tasks = vec![Task::new("C1", "FOO", "1"), Task::new("C2", "BAR", "2")];
        let (summary, events, _) = run_scripted(2, &tasks, &log);

        assert_eq!(summary.unwrap().skipped, 2);
        assert!(events.is_empty());
    }

    #[test]
    fn test_failed_result_write_still_completes() {
        let log = TrafficLog::default();
        let registry = CommandRegistry::builtin();
        let mut events = Vec::new();
        let mut results = FailingResults::default();
        let summary = Scheduler::new(
            scripted_pool(2, 1, &log),
            &registry,
            &mut events,
            &mut results,
            config(),
        )
        .run(&tasks(4))
        .unwrap();

        assert_eq!(summary.completed, summary.total);
        assert_eq!(summary.completed, 4);
        assert_eq!(results.attempts, 4);
        let completed = events
            .iter()
            .filter(|e| e.kind == EventKind::Completed)
            .count();
        assert_eq!(completed, 4);
        assert_eq!(
            log.borrow()
                .iter()
                .filter(|t| matches!(t, Traffic::Terminated(_)))
                .count(),
            2
        );
    }

    #[test]
    fn test_worker_exit_is_fatal() {
        struct DeadLink;

        impl WorkerLink for DeadLink {
            fn send(&mut self, _: &WorkRequest) -> Result<()> {
                Ok(())
            }

            fn try_recv(&mut self) -> Result<Option<WorkResponse>> {
                Err(FarmError::WorkerExited {
                    id: 1,
                    reason: "exited with code 1".to_string(),
                })
            }

            fn terminate(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let registry = CommandRegistry::builtin();
        let mut events = Vec::new();
        let mut results = Vec::new();
        let err = Scheduler::new(
            WorkerPool::new(vec![DeadLink]).unwrap(),
            &registry,
            &mut events,
            &mut results,
            config(),
        )
        .run(&tasks(1))
        .unwrap_err();
        assert!(matches!(err, FarmError::WorkerExited { id: 1, .. }));
    }

    fn loopback_pool(registry: &CommandRegistry, workers: usize) -> WorkerPool<LoopbackLink<'_>> {
        WorkerPool::new(
            (0..workers)
                .map(|_| LoopbackLink {
                    machine: WorkerLoop::new(registry),
                    outbox: VecDeque::new(),
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_loopback_workers_compute_results() {
        let registry = CommandRegistry::builtin();
        let tasks = vec![
            Task::new("C1", "PRIMES", "10"),
            Task::new("C2", "PRIMEDIVISORS", "30"),
            Task::new("C3", "ANAGRAMS", "ab"),
        ];
        let mut events = Vec::new();
        let mut results = Vec::new();
        let summary = Scheduler::new(
            loopback_pool(&registry, 2),
            &registry,
            &mut events,
            &mut results,
            config(),
        )
        .run(&tasks)
        .unwrap();

        assert_eq!(summary.completed, 3);
        let text_for = |client: &str| {
            results
                .iter()
                .find(|r| r.client_id == client)
                .map(|r| r.text.clone())
                .unwrap()
        };
        assert_eq!(text_for("C1"), "Primes up to 10: 4");
        assert_eq!(text_for("C2"), "Prime divisors of 30: 3");
        assert_eq!(text_for("C3"), "Anagrams of ab:\nab\nba\n");
    }

    #[test]
    fn test_serial_and_pooled_results_match() {
        let input = "C1 PRIMES 100\n\
                     C2 PRIMEDIVISORS 360\n\
                     C3 ANAGRAMS abc\n\
                     C4 FOO bar\n\
                     C5 PRIMES 7\n";
        let registry = CommandRegistry::builtin();

        let mut serial_events = Vec::new();
        let mut serial_results = Vec::new();
        SerialExecutor::new(&registry, &mut serial_events, &mut serial_results)
            .with_pause(|_| {})
            .process(Cursor::new(input))
            .unwrap();

        let tasks = crate::task::read_tasks(Cursor::new(input)).unwrap();
        let mut pooled_events = Vec::new();
        let mut pooled_results = Vec::new();
        Scheduler::new(
            loopback_pool(&registry, 3),
            &registry,
            &mut pooled_events,
            &mut pooled_results,
            config(),
        )
        .run(&tasks)
        .unwrap();

        let key = |r: &TaskResult| (r.client_id.clone(), r.text.clone());
        let mut serial: Vec<_> = serial_results.iter().map(key).collect();
        let mut pooled: Vec<_> = pooled_results.iter().map(key).collect();
        serial.sort();
        pooled.sort();
        assert_eq!(serial, pooled);
        assert_eq!(serial.len(), 4);

        // Same events for every resolvable task; the serial path also
        // receives and dispatches the unknown one.
        let kinds = |events: &[LifecycleEvent]| {
            let mut kinds: Vec<_> = events
                .iter()
                .filter(|e| e.client_id != "C4")
                .map(|e| (e.client_id.clone(), e.kind.to_string()))
                .collect();
            kinds.sort();
            kinds
        };
        assert_eq!(kinds(&serial_events[..]), kinds(&pooled_events[..]));
        let unknown = |events: &[LifecycleEvent]| {
            events
                .iter()
                .filter(|e| e.client_id == "C4")
                .map(|e| e.kind)
                .collect::<Vec<_>>()
        };
        assert_eq!(
            unknown(&serial_events[..]),
            vec![EventKind::Received, EventKind::Dispatched]
        );
        assert!(unknown(&pooled_events[..]).is_empty());
    }
}
