//! Worker subprocess pool for parallel task execution.
//!
//! The coordinator spawns a fixed number of worker processes and talks to
//! each over its stdin/stdout pipes. A worker handles one task at a time;
//! the coordinator never blocks on any single worker.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │   Coordinator   │
//!                     │   (Scheduler)   │
//!                     └────────┬────────┘
//!                              │  tag, parameter ──▶
//!               ┌──────────────┼──────────────┐
//!               │              │              │  ◀── result
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 1  │  │ Worker 2  │  │ Worker N  │
//!         │ (process) │  │ (process) │  │ (process) │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! # Features
//!
//! - **Process isolation**: Each worker runs in its own address space
//! - **Non-blocking receive**: Replies are collected with zero-timeout polls
//! - **Orderly shutdown**: Every worker receives the sentinel exactly once

mod ipc;
mod pool;
mod proc;
mod protocol;
mod signals;
mod spawn;
pub mod worker_main;

pub use pool::{MAX_WORKERS, WorkerLink, WorkerPool, check_capacity};
pub use protocol::WorkResponse;
pub use spawn::WorkerConfig;
pub use worker_main::run_worker_main;

#[cfg(test)]
pub use protocol::WorkRequest;
