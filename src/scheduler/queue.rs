//! In-process job queue with dynamic concurrency.
//!
//! A single scheduler task owns the queue state; callers talk to it through
//! a command channel and read its gauges lock-free.
//!
//! # Scheduling
//!
//! - New jobs are appended; retried jobs go back to the front, so retries
//!   are served before later arrivals.
//! - At most `capacity` jobs are in flight. Every 50 ms capacity is resynced
//!   to the number of ready workers; shrinking never pre-empts running work.
//! - A successful dispatch holds its slot for the worker's cooldown.
//!
//! # Retry policy
//!
//! "No workers available" is not the job's fault: the job is requeued
//! without counting an attempt, and dispatching stalls until the next tick.
//! Any other failure counts an attempt; when attempts reach the job's
//! maximum, the job is dropped and reported on the failure channel.
//! A handler that panics fails its job with an internal error.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, DispatchError};

use super::job::Job;

/// Errors that can occur during queue operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The scheduler task is gone.
    #[error("queue is closed")]
    Closed,
}

/// Performs one dispatch of a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs attempt number `attempt` (zero-based) of `job`.
    ///
    /// On success returns how long the slot stays occupied afterwards.
    async fn handle(&self, job: Arc<Job>, attempt: u32) -> Result<Duration, DispatchError>;
}

/// Source of the queue's capacity.
pub trait ReadyWorkers: Send + Sync {
    fn ready_count(&self) -> usize;
}

/// Configuration for a [`JobQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Capacity before the first resync.
    pub initial_capacity: usize,
    /// How often capacity is resynced to the ready-worker count.
    pub resync_interval: Duration,
}

impl QueueConfig {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            initial_capacity,
            resync_interval: Duration::from_millis(50),
        }
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }
}

/// A job that ran out of attempts.
///
/// The job is not completed by the queue; whoever receives this is expected
/// to deliver an error to it.
#[derive(Debug)]
pub struct FailedJob {
    pub job: Arc<Job>,
    /// The failure of the last attempt.
    pub error: DispatchError,
    pub attempts: u32,
}

struct QueueEntry {
    job: Arc<Job>,
    attempts: u32,
    max_attempts: u32,
}

struct Completion {
    entry: QueueEntry,
    outcome: Result<Duration, DispatchError>,
}

enum Command {
    Enqueue(QueueEntry),
    Start,
    Pause,
    Stop(oneshot::Sender<Vec<Arc<Job>>>),
}

#[derive(Default)]
struct QueueGauges {
    len: AtomicUsize,
    capacity: AtomicUsize,
    processing: AtomicUsize,
    running: AtomicBool,
}

/// Handle to a running queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    commands: mpsc::UnboundedSender<Command>,
    gauges: Arc<QueueGauges>,
}

impl JobQueue {
    /// Spawns the scheduler task. The queue starts paused.
    ///
    /// Returns the queue handle and the receiver of terminal failures.
    pub fn spawn(
        config: QueueConfig,
        workers: Arc<dyn ReadyWorkers>,
        handler: Arc<dyn JobHandler>,
    ) -> (Self, mpsc::UnboundedReceiver<FailedJob>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (failures, failure_rx) = mpsc::unbounded_channel();
        let gauges = Arc::new(QueueGauges::default());
        gauges
            .capacity
            .store(config.initial_capacity, Ordering::Relaxed);

        let scheduler = Scheduler {
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            capacity: config.initial_capacity,
            processing: 0,
            running: false,
            stalled: false,
            workers,
            handler,
            failures,
            gauges: Arc::clone(&gauges),
        };
        tokio::spawn(scheduler.run(command_rx, config.resync_interval));

        (Self { commands, gauges }, failure_rx)
    }

    /// Appends `job` to the queue.
    pub fn enqueue(&self, job: Arc<Job>, max_attempts: u32) -> Result<(), QueueError> {
        // Counted here so admission checks see the job before the scheduler does.
        self.gauges.len.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Enqueue(QueueEntry {
            job,
            attempts: 0,
            max_attempts,
        }))
        .inspect_err(|_| {
            self.gauges.len.fetch_sub(1, Ordering::Relaxed);
        })
    }

    /// Starts dispatching. Idempotent.
    pub fn start(&self) -> Result<(), QueueError> {
        self.send(Command::Start)
    }

    /// Stops dispatching new work. In-flight work is left alone.
    pub fn pause(&self) -> Result<(), QueueError> {
        self.send(Command::Pause)
    }

    /// Stops the scheduler, aborting in-flight work.
    ///
    /// Returns every job that was still queued or in flight and not yet
    /// completed.
    pub async fn stop(&self) -> Vec<Arc<Job>> {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Stop(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Number of queued jobs, not counting in-flight ones.
    pub fn len(&self) -> usize {
        self.gauges.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.gauges.capacity.load(Ordering::Relaxed)
    }

    /// Number of in-flight jobs.
    pub fn processing(&self) -> usize {
        self.gauges.processing.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.gauges.running.load(Ordering::Relaxed)
    }

    fn send(&self, command: Command) -> Result<(), QueueError> {
        self.commands.send(command).map_err(|_| QueueError::Closed)
    }
}

struct Scheduler {
    pending: VecDeque<QueueEntry>,
    in_flight: HashMap<task::Id, Arc<Job>>,
    capacity: usize,
    processing: usize,
    running: bool,
    /// Set after "no workers available" until the next resync.
    stalled: bool,
    workers: Arc<dyn ReadyWorkers>,
    handler: Arc<dyn JobHandler>,
    failures: mpsc::UnboundedSender<FailedJob>,
    gauges: Arc<QueueGauges>,
}

impl Scheduler {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, resync: Duration) {
        let mut tasks: JoinSet<Completion> = JoinSet::new();
        let mut ticker = tokio::time::interval(resync);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Enqueue(entry)) => {
                        self.pending.push_back(entry);
                        self.fill(&mut tasks);
                    }
                    Some(Command::Start) => {
                        if !self.running {
                            info!(capacity = self.capacity, "Queue started");
                        }
                        self.running = true;
                        self.fill(&mut tasks);
                    }
                    Some(Command::Pause) => {
                        if self.running {
                            info!("Queue paused");
                        }
                        self.running = false;
                    }
                    Some(Command::Stop(reply)) => {
                        let _ = reply.send(self.drain());
                        break;
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    self.finish(joined);
                    self.fill(&mut tasks);
                }
                _ = ticker.tick() => self.resync(&mut tasks),
            }
            self.publish();
        }

        tasks.abort_all();
        self.running = false;
        self.processing = 0;
        self.publish();
        debug!("Queue scheduler exited");
    }

    fn fill(&mut self, tasks: &mut JoinSet<Completion>) {
        while self.running && !self.stalled && self.processing < self.capacity {
            let Some(entry) = self.pending.pop_front() else {
                break;
            };
            self.gauges.len.fetch_sub(1, Ordering::Relaxed);
            if entry.job.is_done() {
                debug!(job_id = %entry.job.id(), "Skipping completed job");
                continue;
            }

            self.processing += 1;
            let job = Arc::clone(&entry.job);
            let handler = Arc::clone(&self.handler);
            let spawned = tasks.spawn(async move {
                let outcome = handler.handle(Arc::clone(&entry.job), entry.attempts).await;
                if let Ok(cooldown) = &outcome {
                    tokio::time::sleep(*cooldown).await;
                }
                Completion { entry, outcome }
            });
            self.in_flight.insert(spawned.id(), job);
        }
    }

    fn finish(&mut self, joined: Result<(task::Id, Completion), JoinError>) {
        self.processing = self.processing.saturating_sub(1);

        let Completion { mut entry, outcome } = match joined {
            Ok((id, completion)) => {
                self.in_flight.remove(&id);
                completion
            }
            Err(e) => {
                let job = self.in_flight.remove(&e.id());
                error!(
                    job_id = ?job.as_ref().map(|job| job.id()),
                    error = %e,
                    "Job handler task failed"
                );
                if let Some(job) = job {
                    job.set_error(ApiError::Internal);
                }
                return;
            }
        };

        let error = match outcome {
            Ok(_) => return,
            Err(error) => error,
        };

        if !error.counts_as_attempt() {
            debug!(job_id = %entry.job.id(), "No workers available, requeueing");
            self.stalled = true;
            self.requeue(entry);
            return;
        }

        entry.attempts += 1;
        if entry.attempts >= entry.max_attempts {
            warn!(
                job_id = %entry.job.id(),
                asset_id = entry.job.link().asset_id,
                attempts = entry.attempts,
                error = %error,
                "Job failed after max attempts"
            );
            let _ = self.failures.send(FailedJob {
                job: entry.job,
                error,
                attempts: entry.attempts,
            });
        } else {
            debug!(
                job_id = %entry.job.id(),
                attempts = entry.attempts,
                error = %error,
                "Requeueing job"
            );
            self.requeue(entry);
        }
    }

    fn requeue(&mut self, entry: QueueEntry) {
        self.gauges.len.fetch_add(1, Ordering::Relaxed);
        self.pending.push_front(entry);
    }

    fn resync(&mut self, tasks: &mut JoinSet<Completion>) {
        let ready = self.workers.ready_count();
        let grew = ready > self.capacity;
        if ready != self.capacity {
            debug!(from = self.capacity, to = ready, "Queue capacity changed");
            self.capacity = ready;
        }
        if grew || self.stalled {
            self.stalled = false;
            self.fill(tasks);
        }
    }

    fn drain(&mut self) -> Vec<Arc<Job>> {
        let mut jobs: Vec<Arc<Job>> = self.in_flight.drain().map(|(_, job)| job).collect();
        jobs.extend(self.pending.drain(..).map(|entry| entry.job));
        self.gauges.len.store(0, Ordering::Relaxed);
        jobs.retain(|job| !job.is_done());
        jobs
    }

    fn publish(&self) {
        self.gauges.capacity.store(self.capacity, Ordering::Relaxed);
        self.gauges.processing.store(self.processing, Ordering::Relaxed);
        self.gauges.running.store(self.running, Ordering::Relaxed);
    }
}
