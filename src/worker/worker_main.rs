//! Worker subprocess main entry point.
//!
//! This module runs when `taskfarm --internal-worker` is invoked. The worker
//! reads a tag, then a parameter, executes the tagged command and writes one
//! reply, until the termination sentinel arrives.

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{WorkRequest, WorkResponse};
use crate::commands::{CommandRegistry, DispatchTag, UNKNOWN_COMMAND};
use std::io;
use tracing::{debug, warn};

/// Where a worker is in its receive-execute-reply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    AwaitingTag,
    AwaitingParameter(DispatchTag),
    Terminated,
}

/// The request-handling state machine, independent of any pipes.
pub struct WorkerLoop<'r> {
    registry: &'r CommandRegistry,
    state: WorkerState,
    handled: usize,
}

impl<'r> WorkerLoop<'r> {
    pub fn new(registry: &'r CommandRegistry) -> Self {
        Self {
            registry,
            state: WorkerState::AwaitingTag,
            handled: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Number of replies produced so far.
    pub fn handled(&self) -> usize {
        self.handled
    }

    pub fn is_terminated(&self) -> bool {
        self.state == WorkerState::Terminated
    }

    /// Advance on one request. Returns the reply owed to the coordinator,
    /// which only a parameter completing a dispatch produces.
    pub fn handle(&mut self, request: WorkRequest) -> Option<WorkResponse> {
        match (self.state, request) {
            (WorkerState::Terminated, request) => {
                warn!(?request, "Request after termination ignored");
                None
            }
            (_, WorkRequest::Tag { tag }) if tag.is_terminate() => {
                debug!("Termination sentinel received");
                self.state = WorkerState::Terminated;
                None
            }
            (WorkerState::AwaitingTag, WorkRequest::Tag { tag }) => {
                self.state = WorkerState::AwaitingParameter(tag);
                None
            }
            (WorkerState::AwaitingTag, WorkRequest::Parameter { value }) => {
                warn!(parameter = %value, "Parameter without a preceding tag ignored");
                None
            }
            (WorkerState::AwaitingParameter(pending), WorkRequest::Tag { tag }) => {
                warn!(%pending, %tag, "Tag replaced before its parameter arrived");
                self.state = WorkerState::AwaitingParameter(tag);
                None
            }
            (WorkerState::AwaitingParameter(tag), WorkRequest::Parameter { value }) => {
                self.state = WorkerState::AwaitingTag;
                self.handled += 1;
                let text = self
                    .registry
                    .execute(tag, &value)
                    .unwrap_or_else(|| UNKNOWN_COMMAND.to_string());
                Some(WorkResponse::result(text))
            }
        }
    }

    /// A line that did not parse. If a reply is owed, answer with an error
    /// so the coordinator's slot is released.
    pub fn reject(&mut self, reason: &str) -> Option<WorkResponse> {
        match self.state {
            WorkerState::AwaitingParameter(_) => {
                self.state = WorkerState::AwaitingTag;
                self.handled += 1;
                Some(WorkResponse::error(format!("Invalid request: {}", reason)))
            }
            _ => {
                warn!(reason, "Invalid request ignored");
                None
            }
        }
    }
}

/// Worker main loop.
///
/// Reads requests from `reader` and writes replies to `writer`. EOF on the
/// request pipe ends the loop the same way the sentinel does.
pub fn worker_loop(
    reader: &mut LineReader,
    writer: &mut LineWriter,
    registry: &CommandRegistry,
) -> io::Result<usize> {
    let mut machine = WorkerLoop::new(registry);

    while !machine.is_terminated() {
        let Some(line) = reader.read_line()? else {
            debug!("Request pipe closed");
            break;
        };

        let reply = match WorkRequest::from_line(line) {
            Ok(request) => machine.handle(request),
            Err(e) => machine.reject(&e.to_string()),
        };

        if let Some(reply) = reply {
            let line = reply.to_line().map_err(io::Error::other)?;
            writer.write_line(&line)?;
        }
    }

    Ok(machine.handled())
}

/// Run the worker subprocess main function.
///
/// This function never returns; it exits the process when the loop ends.
pub fn run_worker_main(id: usize) -> ! {
    // Ignore SIGPIPE - a vanished coordinator surfaces as an io::Error
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    // Safety: file descriptors 0 and 1 are always valid for stdin/stdout
    let stdin_fd = unsafe { PipeFd::from_raw(0) };
    let stdout_fd = unsafe { PipeFd::from_raw(1) };

    let mut reader = LineReader::new(stdin_fd);
    let mut writer = LineWriter::new(stdout_fd);
    let registry = CommandRegistry::builtin();

    match worker_loop(&mut reader, &mut writer, &registry) {
        Ok(handled) => {
            debug!(worker_id = id, handled, "Worker exiting");
            std::process::exit(0)
        }
        Err(e) => {
            eprintln!("Worker {} error: {}", id, e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_then_parameter_produces_reply() {
        let registry = CommandRegistry::builtin();
        let mut machine = WorkerLoop::new(&registry);

        assert_eq!(machine.handle(WorkRequest::tag(DispatchTag::PRIMES)), None);
        assert_eq!(
            machine.state(),
            WorkerState::AwaitingParameter(DispatchTag::PRIMES)
        );

        let reply = machine.handle(WorkRequest::parameter("10"));
        assert_eq!(reply, Some(WorkResponse::result("Primes up to 10: 4")));
        assert_eq!(machine.state(), WorkerState::AwaitingTag);
        assert_eq!(machine.handled(), 1);
    }

    #[test]
    fn test_sentinel_terminates_from_any_live_state() {
        let registry = CommandRegistry::builtin();

        let mut idle = WorkerLoop::new(&registry);
        assert_eq!(idle.handle(WorkRequest::terminate()), None);
        assert!(idle.is_terminated());

        let mut mid = WorkerLoop::new(&registry);
        mid.handle(WorkRequest::tag(DispatchTag::ANAGRAMS));
        mid.handle(WorkRequest::terminate());
        assert!(mid.is_terminated());
        assert_eq!(mid.handled(), 0);
    }

    #[test]
    fn test_unknown_tag_replies_unknown_command() {
        let registry = CommandRegistry::builtin();
        let mut machine = WorkerLoop::new(&registry);
        machine.handle(WorkRequest::tag(DispatchTag(7)));
        assert_eq!(
            machine.handle(WorkRequest::parameter("x")),
            Some(WorkResponse::result(UNKNOWN_COMMAND))
        );
    }

    #[test]
    fn test_stray_parameter_is_ignored() {
        let registry = CommandRegistry::builtin();
        let mut machine = WorkerLoop::new(&registry);
        assert_eq!(machine.handle(WorkRequest::parameter("10")), None);
        assert_eq!(machine.state(), WorkerState::AwaitingTag);
    }

    #[test]
    fn test_reject_only_replies_when_owed() {
        let registry = CommandRegistry::builtin();
        let mut machine = WorkerLoop::new(&registry);
        assert_eq!(machine.reject("garbage"), None);

        machine.handle(WorkRequest::tag(DispatchTag::PRIMES));
        let reply = machine.reject("garbage");
        assert!(matches!(reply, Some(WorkResponse::Error { .. })));
        assert_eq!(machine.state(), WorkerState::AwaitingTag);
    }

    #[test]
    fn test_reply_respects_result_capacity() {
        let registry = CommandRegistry::builtin();
        let mut machine = WorkerLoop::new(&registry);
        machine.handle(WorkRequest::tag(DispatchTag::ANAGRAMS));
        let Some(WorkResponse::Result { text }) = machine.handle(WorkRequest::parameter("abcdefg"))
        else {
            panic!("expected a result");
        };
        assert!(text.len() <= crate::commands::RESULT_CAPACITY);
    }

    #[test]
    fn test_worker_loop_over_pipes() {
        let (req_read, req_write) = nix::unistd::pipe().unwrap();
        let (resp_read, resp_write) = nix::unistd::pipe().unwrap();

        let mut coordinator_out = LineWriter::new(PipeFd::new(req_write));
        for request in [
            WorkRequest::tag(DispatchTag::PRIME_DIVISORS),
            WorkRequest::parameter("12"),
            WorkRequest::tag(DispatchTag::PRIMES),
        ] {
            coordinator_out
                .write_line(&request.to_line().unwrap())
                .unwrap();
        }
        coordinator_out.write_line("not json").unwrap();
        coordinator_out
            .write_line(&WorkRequest::terminate().to_line().unwrap())
            .unwrap();
        drop(coordinator_out);

        let registry = CommandRegistry::builtin();
        let mut reader = LineReader::new(PipeFd::new(req_read));
        let mut writer = LineWriter::new(PipeFd::new(resp_write));
        let handled = worker_loop(&mut reader, &mut writer, &registry).unwrap();
        drop(writer);
        assert_eq!(handled, 2);

        let mut replies = LineReader::new(PipeFd::new(resp_read));
        let first = WorkResponse::from_line(replies.read_line().unwrap().unwrap()).unwrap();
        assert_eq!(first, WorkResponse::result("Prime divisors of 12: 2"));
        let second = WorkResponse::from_line(replies.read_line().unwrap().unwrap()).unwrap();
        assert!(matches!(second, WorkResponse::Error { .. }));
        assert_eq!(replies.read_line().unwrap(), None);
    }

    #[test]
    fn test_worker_loop_stops_on_eof() {
        let (req_read, req_write) = nix::unistd::pipe().unwrap();
        let (_resp_read, resp_write) = nix::unistd::pipe().unwrap();
        drop(req_write);

        let registry = CommandRegistry::builtin();
        let mut reader = LineReader::new(PipeFd::new(req_read));
        let mut writer = LineWriter::new(PipeFd::new(resp_write));
        assert_eq!(worker_loop(&mut reader, &mut writer, &registry).unwrap(), 0);
    }
}
