//! Pool of worker sessions.
//!
//! The pool owns every [`Worker`], picks a free one for each dispatch and
//! keeps per-worker statistics.
//!
//! # Features
//!
//! - Uniformly random selection among ready, non-busy workers
//! - Per-worker request/error counters, read as a snapshot
//! - Edge-triggered aggregate availability ("at least one worker ready")
//!
//! Workers are only ever appended, in registration order, so statistics
//! snapshots have a stable ordering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::inspect::InspectLink;
use crate::session::{Credentials, SessionFactory, SessionOptions};

use super::queue::ReadyWorkers;
use super::worker::{InspectResult, PendingInspect, Worker, WorkerSettings};

/// Counters for one worker. Monotonic for the worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatistics {
    /// Requests dispatched to this worker.
    pub requests: u64,
    /// Requests that failed on this worker.
    pub errors: u64,
    /// Successful requests that were retries of an earlier failure.
    pub initial_errors: u64,
}

#[derive(Default)]
struct WorkerCounters {
    requests: AtomicU64,
    errors: AtomicU64,
    initial_errors: AtomicU64,
}

impl WorkerCounters {
    fn snapshot(&self) -> WorkerStatistics {
        WorkerStatistics {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            initial_errors: self.initial_errors.load(Ordering::Relaxed),
        }
    }
}

struct WorkerEntry {
    worker: Worker,
    counters: WorkerCounters,
}

/// Owns the workers and routes requests to them.
pub struct WorkerPool {
    factory: Arc<dyn SessionFactory>,
    workers: RwLock<Vec<Arc<WorkerEntry>>>,
    available: watch::Sender<bool>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Creates an empty pool whose sessions come from `factory`.
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        let (available, _) = watch::channel(false);
        Self {
            factory,
            workers: RwLock::new(Vec::new()),
            available,
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Adds a worker for `credentials` and starts its login.
    ///
    /// The pool follows the worker's readiness from then on and updates its
    /// aggregate availability on every change.
    pub fn add(
        self: &Arc<Self>,
        credentials: Credentials,
        settings: WorkerSettings,
        options: &SessionOptions,
    ) -> Worker {
        let (session, events) = self.factory.create(options);
        let worker = Worker::spawn(credentials, settings, session, events);
        let mut ready = worker.subscribe_ready();

        self.workers
            .write()
            .expect("workers lock poisoned")
            .push(Arc::new(WorkerEntry {
                worker: worker.clone(),
                counters: WorkerCounters::default(),
            }));

        let pool = Arc::downgrade(self);
        let watcher = tokio::spawn(async move {
            while ready.changed().await.is_ok() {
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.refresh_availability();
            }
        });
        self.watchers
            .lock()
            .expect("watchers lock poisoned")
            .push(watcher);

        info!(
            worker = %worker.username(),
            proxied = options.proxy.is_some(),
            "Added worker"
        );
        worker.log_in();
        worker
    }

    /// Number of workers with a live coordinator link.
    pub fn ready_count(&self) -> usize {
        self.entries().iter().filter(|e| e.worker.is_ready()).count()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.read().expect("workers lock poisoned").len()
    }

    /// Whether at least one worker is ready.
    pub fn has_ready_worker(&self) -> bool {
        self.entries().iter().any(|e| e.worker.is_ready())
    }

    /// All workers, in registration order.
    pub fn workers(&self) -> Vec<Worker> {
        self.entries().iter().map(|e| e.worker.clone()).collect()
    }

    /// Per-worker counters, in registration order.
    pub fn statistics(&self) -> Vec<WorkerStatistics> {
        self.entries().iter().map(|e| e.counters.snapshot()).collect()
    }

    /// Subscribes to aggregate availability. The value only changes when
    /// the pool goes from no ready worker to some, or back.
    pub fn subscribe_availability(&self) -> watch::Receiver<bool> {
        self.available.subscribe()
    }

    /// A random worker that is ready and not busy, if any.
    pub fn pick_free(&self) -> Option<Worker> {
        self.free_candidates()
            .into_iter()
            .next()
            .map(|e| e.worker.clone())
    }

    /// Sends `link` to a free worker and waits for the outcome.
    ///
    /// `attempt` is the job's attempt index; a success with `attempt > 0`
    /// is recorded as an initial error on the worker that succeeded.
    ///
    /// # Errors
    ///
    /// - `DispatchError::NoWorkersAvailable` if no worker could be claimed.
    ///   No statistics are touched in that case.
    /// - `DispatchError::Worker` if the claimed worker failed the request.
    pub async fn dispatch(
        &self,
        link: &InspectLink,
        attempt: u32,
    ) -> Result<InspectResult, DispatchError> {
        let (entry, pending) = self
            .claim(link)
            .ok_or(DispatchError::NoWorkersAvailable)?;
        entry.counters.requests.fetch_add(1, Ordering::Relaxed);

        let outcome = pending.wait().await;
        match &outcome {
            Ok(_) if attempt > 0 => {
                entry.counters.initial_errors.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(e) => {
                entry.counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker = %entry.worker.username(),
                    asset_id = link.asset_id,
                    attempt,
                    error = %e,
                    "Dispatch failed"
                );
            }
        }
        outcome.map_err(DispatchError::from)
    }

    /// Stops every worker.
    pub fn shutdown(&self) {
        for watcher in self
            .watchers
            .lock()
            .expect("watchers lock poisoned")
            .drain(..)
        {
            watcher.abort();
        }
        for entry in self.entries() {
            entry.worker.shutdown();
        }
        self.refresh_availability();
    }

    fn entries(&self) -> Vec<Arc<WorkerEntry>> {
        self.workers.read().expect("workers lock poisoned").clone()
    }

    fn free_candidates(&self) -> Vec<Arc<WorkerEntry>> {
        let mut candidates: Vec<_> = self
            .entries()
            .into_iter()
            .filter(|e| e.worker.is_free())
            .collect();
        candidates.shuffle(&mut rand::rng());
        candidates
    }

    /// Claims the first shuffled candidate that accepts the request. A
    /// candidate may have been taken since it was listed, so rejections
    /// move on to the next one.
    fn claim(&self, link: &InspectLink) -> Option<(Arc<WorkerEntry>, PendingInspect)> {
        for entry in self.free_candidates() {
            match entry.worker.begin_request(link) {
                Ok(pending) => return Some((entry, pending)),
                Err(e) => {
                    debug!(worker = %entry.worker.username(), error = %e, "Candidate no longer free");
                }
            }
        }
        None
    }

    fn refresh_availability(&self) {
        // Computed under the channel lock so concurrent refreshes serialize
        // and the last one reads the latest worker state.
        let mut now_available = false;
        let changed = self.available.send_if_modified(|current| {
            now_available = self.has_ready_worker();
            if *current == now_available {
                return false;
            }
            *current = now_available;
            true
        });

        if changed {
            if now_available {
                info!(ready = self.ready_count(), "Workers available");
            } else {
                warn!("No workers ready");
            }
        }
    }
}

impl ReadyWorkers for WorkerPool {
    fn ready_count(&self) -> usize {
        WorkerPool::ready_count(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use crate::inspect::OwnerKind;
    use crate::session::mock::MockFactory;
    use std::collections::HashSet;
    use std::time::Duration;

    fn settings() -> WorkerSettings {
        WorkerSettings::default().with_relogin(Duration::ZERO, Duration::ZERO)
    }

    fn link(asset: u64) -> InspectLink {
        InspectLink::new(OwnerKind::Listing, 1, asset, 2)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn pool_with(factory: &Arc<MockFactory>, workers: usize) -> Arc<WorkerPool> {
        let pool = Arc::new(WorkerPool::new(factory.clone()));
        for i in 0..workers {
            pool.add(
                Credentials::new(format!("bot{}", i), "pw"),
                settings(),
                &SessionOptions::default(),
            );
        }
        pool
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_come_online() {
        let factory = Arc::new(MockFactory::new(Some(Duration::from_millis(100))));
        let pool = pool_with(&factory, 3);
        assert_eq!(pool.worker_count(), 3);

        settle().await;

        assert_eq!(pool.ready_count(), 3);
        assert!(pool.has_ready_worker());
        assert_eq!(pool.statistics(), vec![WorkerStatistics::default(); 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_availability_is_edge_triggered_on_aggregate() {
        let factory = Arc::new(MockFactory::new(None));
        let pool = Arc::new(WorkerPool::new(factory.clone()));
        let mut available = pool.subscribe_availability();

        for i in 0..2 {
            pool.add(
                Credentials::new(format!("bot{}", i), "pw"),
                settings(),
                &SessionOptions::default(),
            );
        }
        settle().await;
        assert!(available.has_changed().expect("pool alive"));
        assert!(*available.borrow_and_update());

        // One of two workers dropping does not change the aggregate.
        factory.session(0).disconnect();
        settle().await;
        assert!(!available.has_changed().expect("pool alive"));

        factory.session(1).disconnect();
        settle().await;
        assert!(available.has_changed().expect("pool alive"));
        assert!(!*available.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_records_statistics() {
        let factory = Arc::new(MockFactory::new(Some(Duration::from_millis(100))));
        let pool = pool_with(&factory, 1);
        settle().await;

        let result = pool.dispatch(&link(10), 0).await.expect("lookup");
        assert_eq!(result.item_info.item_id, 10);
        assert_eq!(result.cooldown, Duration::from_millis(1000));

        tokio::time::sleep(result.cooldown).await;
        pool.dispatch(&link(11), 2).await.expect("lookup");

        assert_eq!(
            pool.statistics(),
            vec![WorkerStatistics {
                requests: 2,
                errors: 0,
                initial_errors: 1,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_failure_counts_error() {
        let factory = Arc::new(MockFactory::new(None));
        let pool = pool_with(&factory, 1);
        settle().await;

        let err = pool.dispatch(&link(10), 0).await.expect_err("no reply");
        assert_eq!(
            err,
            DispatchError::Worker(WorkerError::TtlExceeded(Duration::from_millis(2000)))
        );
        assert_eq!(pool.statistics()[0].requests, 1);
        assert_eq!(pool.statistics()[0].errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_free_worker_leaves_statistics_alone() {
        let factory = Arc::new(MockFactory::new(Some(Duration::from_millis(100))));
        let pool = pool_with(&factory, 1);
        settle().await;

        // Occupy the only worker.
        let busy = pool.pick_free().expect("free worker");
        let _pending = busy.begin_request(&link(1)).expect("claim");

        assert!(pool.pick_free().is_none());
        assert_eq!(
            pool.dispatch(&link(2), 0).await.expect_err("busy"),
            DispatchError::NoWorkersAvailable
        );
        assert_eq!(pool.statistics(), vec![WorkerStatistics::default()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pool_has_no_workers_available() {
        let factory = Arc::new(MockFactory::new(None));
        let pool = pool_with(&factory, 0);

        assert!(!pool.has_ready_worker());
        assert_eq!(
            pool.dispatch(&link(2), 0).await.expect_err("empty"),
            DispatchError::NoWorkersAvailable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pick_free_spreads_load() {
        let factory = Arc::new(MockFactory::new(None));
        let pool = pool_with(&factory, 3);
        settle().await;

        let picked: HashSet<String> = (0..200)
            .filter_map(|_| pool.pick_free())
            .map(|w| w.username().to_string())
            .collect();
        assert_eq!(picked.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_takes_pool_offline() {
        let factory = Arc::new(MockFactory::new(None));
        let pool = pool_with(&factory, 2);
        settle().await;
        let available = pool.subscribe_availability();
        assert!(*available.borrow());

        pool.shutdown();

        assert_eq!(pool.ready_count(), 0);
        assert!(!*available.borrow());
    }
}
