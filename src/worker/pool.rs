//! Worker pool bookkeeping.
//!
//! The pool owns one [`WorkerSlot`] per worker. A slot is `Busy` exactly
//! while a reply is outstanding, and a busy slot refuses a second task.

use super::proc::Proc;
use super::protocol::{WorkRequest, WorkResponse};
use super::spawn::{WorkerConfig, spawn_worker};
use crate::commands::DispatchTag;
use crate::error::{FarmError, Result};
use tracing::{debug, info};

/// Hard upper bound on pool size.
pub const MAX_WORKERS: usize = 32;

/// Coordinator-side channel to one worker.
pub trait WorkerLink {
    /// Hand a request to the worker without waiting for it to be processed.
    fn send(&mut self, request: &WorkRequest) -> Result<()>;

    /// Return the worker's reply if it has arrived. Never blocks.
    fn try_recv(&mut self) -> Result<Option<WorkResponse>>;

    /// Deliver the termination sentinel and release the worker.
    fn terminate(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Free,
    /// Waiting for the reply to the task at this queue index.
    Busy { task: usize },
}

/// One pool member as seen by the coordinator.
pub struct WorkerSlot<L> {
    id: usize,
    link: L,
    status: SlotStatus,
    jobs_completed: usize,
}

impl<L: WorkerLink> WorkerSlot<L> {
    /// Worker identity, numbered from 1.
    pub fn id(&self) -> usize {
        self.id
    }

    #[cfg(test)]
    pub fn status(&self) -> SlotStatus {
        self.status
    }

    pub fn is_free(&self) -> bool {
        self.status == SlotStatus::Free
    }

    /// Send a task's tag and parameter and mark the slot busy.
    pub fn assign(&mut self, task: usize, tag: DispatchTag, parameter: &str) -> Result<()> {
        if let SlotStatus::Busy { task: current } = self.status {
            return Err(FarmError::Worker(format!(
                "Worker {} is still busy with task {}",
                self.id, current
            )));
        }
        self.link.send(&WorkRequest::tag(tag))?;
        self.link.send(&WorkRequest::parameter(parameter))?;
        self.status = SlotStatus::Busy { task };
        Ok(())
    }

    /// Check for a reply without blocking. On arrival the slot is freed and
    /// the finished task's queue index is returned with the response.
    pub fn poll(&mut self) -> Result<Option<(usize, WorkResponse)>> {
        let SlotStatus::Busy { task } = self.status else {
            return Ok(None);
        };
        let Some(response) = self.link.try_recv()? else {
            return Ok(None);
        };
        self.status = SlotStatus::Free;
        self.jobs_completed += 1;
        Ok(Some((task, response)))
    }

    #[cfg(test)]
    pub fn link(&self) -> &L {
        &self.link
    }
}

/// Statistics about a finished pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub worker_count: usize,
    pub total_jobs_completed: usize,
    /// Completed jobs per worker, indexed by slot.
    pub jobs_per_worker: Vec<usize>,
}

/// A fixed set of workers owned by the coordinator.
pub struct WorkerPool<L> {
    slots: Vec<WorkerSlot<L>>,
}

/// Reject pool sizes outside `1..=MAX_WORKERS`.
pub fn check_capacity(requested: usize) -> Result<()> {
    if requested == 0 {
        return Err(FarmError::EmptyPool);
    }
    if requested > MAX_WORKERS {
        return Err(FarmError::CapacityExceeded {
            requested,
            max: MAX_WORKERS,
        });
    }
    Ok(())
}

impl<L: WorkerLink> WorkerPool<L> {
    /// Build a pool over already-connected links; slot `i` is worker `i + 1`.
    pub fn new(links: Vec<L>) -> Result<Self> {
        check_capacity(links.len())?;
        let slots = links
            .into_iter()
            .enumerate()
            .map(|(index, link)| WorkerSlot {
                id: index + 1,
                link,
                status: SlotStatus::Free,
                jobs_completed: 0,
            })
            .collect();
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slots_mut(&mut self) -> &mut [WorkerSlot<L>] {
        &mut self.slots
    }

    #[cfg(test)]
    pub fn slots(&self) -> &[WorkerSlot<L>] {
        &self.slots
    }

    pub fn stats(&self) -> PoolStats {
        let jobs_per_worker: Vec<usize> = self.slots.iter().map(|s| s.jobs_completed).collect();
        PoolStats {
            worker_count: self.slots.len(),
            total_jobs_completed: jobs_per_worker.iter().sum(),
            jobs_per_worker,
        }
    }

    /// Terminate every worker exactly once. Consumes the pool, so a second
    /// round of termination signals cannot happen.
    ///
    /// Every worker is signalled even if an earlier one fails; the first
    /// failure is returned.
    pub fn shutdown(mut self) -> Result<PoolStats> {
        if let Some(busy) = self.slots.iter().find(|s| !s.is_free()) {
            return Err(FarmError::Worker(format!(
                "Refusing to terminate worker {} while a task is outstanding",
                busy.id
            )));
        }

        let stats = self.stats();
        let mut first_error = None;
        for slot in &mut self.slots {
            debug!(worker_id = slot.id, "Terminating worker");
            if let Err(e) = slot.link.terminate() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

impl WorkerPool<Proc> {
    /// Spawn `count` worker processes.
    pub fn spawn(count: usize, config: &WorkerConfig) -> Result<Self> {
        check_capacity(count)?;
        info!(workers = count, "Spawning worker pool");

        let links = (1..=count)
            .map(|id| spawn_worker(id, config))
            .collect::<Result<Vec<_>>>()?;
        Self::new(links)
    }
}
