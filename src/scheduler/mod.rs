//! Dispatch of inspect lookups across worker sessions.
//!
//! This module provides the scheduling core:
//!
//! - **Worker**: one session with a ready/busy state machine and a
//!   single-outstanding-request protocol (cooldown, TTL)
//! - **WorkerPool**: owns the workers, picks a free one per dispatch and
//!   keeps per-worker statistics
//! - **JobQueue**: matches pending jobs to pool capacity with retries and
//!   backpressure
//! - **Job**: a pending lookup with exactly-once delivery
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │    Caller    │
//!                      └──────┬───────┘
//!                             │ Job
//!                      ┌──────▼───────┐     ready count
//!                      │   JobQueue   │◄────────────────┐
//!                      └──────┬───────┘                 │
//!                             │ dispatch(link, attempt) │
//!                      ┌──────▼───────┐                 │
//!                      │  WorkerPool  ├─────────────────┘
//!                      └──────┬───────┘
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use inspect_dispatch::scheduler::{Job, JobQueue, QueueConfig, WorkerPool, WorkerSettings};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(WorkerPool::new(factory));
//! pool.add(credentials, WorkerSettings::default(), &SessionOptions::default());
//!
//! let (queue, mut failures) = JobQueue::spawn(QueueConfig::new(1), pool.clone(), handler);
//! queue.start()?;
//!
//! let (job, outcome) = Job::with_channel(link);
//! queue.enqueue(Arc::new(job), 3)?;
//! ```

pub mod job;
pub mod queue;
pub mod worker;
pub mod worker_pool;

// Re-export main types for convenience
pub use job::{ChannelSink, DeliverySink, Job, JobOutcome};
pub use queue::{FailedJob, JobHandler, JobQueue, QueueConfig, QueueError, ReadyWorkers};
pub use worker::{InspectResult, PendingInspect, Worker, WorkerSettings};
pub use worker_pool::{WorkerPool, WorkerStatistics};
