//! The inspect service: cache, pool and queue wired together.
//!
//! A submitted job takes one of these paths:
//!
//! ```text
//! submit ──► cache hit ─────────────────────────────► result
//!        ├─► no ready worker ───────────────────────► ServiceOffline
//!        ├─► queue at max size ─────────────────────► MaxQueueSize
//!        └─► queue ──► pool.dispatch ──► cache.save ─► result
//!                 └──► attempts exhausted ──────────► mapped error
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ServiceConfig};
use crate::error::{ApiError, DispatchError};
use crate::inspect::InspectLink;
use crate::item::Item;
use crate::metrics::{outcome, ServiceMetrics};
use crate::scheduler::{
    FailedJob, Job, JobHandler, JobQueue, QueueConfig, WorkerPool, WorkerStatistics,
};
use crate::session::SessionFactory;
use crate::storage::ItemCache;

/// Errors starting a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Service-wide request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStatistics {
    /// Jobs submitted.
    pub requests: u64,
    /// Jobs that ran out of attempts.
    pub errors: u64,
}

#[derive(Default)]
struct ServiceCounters {
    requests: AtomicU64,
    errors: AtomicU64,
}

/// Snapshot returned by [`InspectService::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub status: String,
    pub bots_online: usize,
    pub bots_total: usize,
    pub queue_size: usize,
    /// Current queue capacity, which tracks the ready-worker count.
    pub queue_workers: usize,
    pub statistics: ServiceStatistics,
    pub bots: Vec<WorkerStatistics>,
}

/// Runs one lookup for the queue.
struct InspectHandler {
    pool: Arc<WorkerPool>,
    cache: Arc<dyn ItemCache>,
    metrics: ServiceMetrics,
}

#[async_trait]
impl JobHandler for InspectHandler {
    async fn handle(&self, job: Arc<Job>, attempt: u32) -> Result<Duration, DispatchError> {
        let link = *job.link();
        let result = self.pool.dispatch(&link, attempt).await?;
        debug!(asset_id = link.asset_id, attempt, "Received item info");

        let item = Item::from_item_info(&link, &result.item_info);

        // A failed write never blocks delivery.
        if let Err(e) = self.cache.save(&item).await {
            warn!(link = %link, error = %e, "Failed to save item");
            self.metrics.record_persistence_error();
        }

        if job.set_result(item) {
            self.metrics.record_request(outcome::COMPLETED);
            let elapsed = (Utc::now() - job.created_at()).to_std().unwrap_or_default();
            self.metrics.record_lookup(elapsed);
        }

        Ok(result.cooldown)
    }
}

/// Composition root for inspect lookups.
pub struct InspectService {
    config: ServiceConfig,
    pool: Arc<WorkerPool>,
    queue: JobQueue,
    cache: Arc<dyn ItemCache>,
    metrics: ServiceMetrics,
    counters: Arc<ServiceCounters>,
    failure_listener: Mutex<Option<JoinHandle<()>>>,
}

impl InspectService {
    /// Validates `config`, starts one worker per account and starts the
    /// queue. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Config` if the configuration is invalid.
    pub fn start(
        config: ServiceConfig,
        factory: Arc<dyn SessionFactory>,
        cache: Arc<dyn ItemCache>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let metrics = ServiceMetrics::new()?;

        let pool = Arc::new(WorkerPool::new(factory));
        let settings = config.worker_settings();
        for (index, account) in config.accounts.iter().enumerate() {
            pool.add(account.clone(), settings.clone(), &config.session_options(index));
        }

        let handler = Arc::new(InspectHandler {
            pool: Arc::clone(&pool),
            cache: Arc::clone(&cache),
            metrics: metrics.clone(),
        });
        let (queue, failures) = JobQueue::spawn(
            QueueConfig::new(config.accounts.len()),
            pool.clone(),
            handler,
        );
        // Only fails if the queue task is gone, which it cannot be yet.
        let _ = queue.start();

        let counters = Arc::new(ServiceCounters::default());
        let failure_listener = tokio::spawn(listen_for_failures(
            failures,
            Arc::clone(&counters),
            metrics.clone(),
        ));

        info!(
            workers = config.accounts.len(),
            proxies = config.proxies.len(),
            max_attempts = config.max_attempts,
            "Inspect service started"
        );

        Ok(Self {
            config,
            pool,
            queue,
            cache,
            metrics,
            counters,
            failure_listener: Mutex::new(Some(failure_listener)),
        })
    }

    /// Admits a job. The outcome is delivered through the job's sink.
    pub async fn submit(&self, job: Arc<Job>) {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let link = *job.link();

        match self.cache.find_by_item_id(link.asset_id).await {
            Ok(Some(item)) => {
                debug!(asset_id = link.asset_id, "Cache hit");
                job.set_result(item);
                self.metrics.record_request(outcome::CACHED);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(link = %link, error = %e, "Cache lookup failed, asking a worker");
            }
        }

        if !self.pool.has_ready_worker() {
            self.reject(&job, ApiError::ServiceOffline, outcome::OFFLINE);
            return;
        }

        if let Some(limit) = self.config.queue_limit() {
            if self.queue.len() + 1 > limit {
                self.reject(&job, ApiError::MaxQueueSize, outcome::QUEUE_FULL);
                return;
            }
        }

        match self.queue.enqueue(Arc::clone(&job), self.config.max_attempts) {
            Ok(()) => self.metrics.record_request(outcome::QUEUED),
            Err(e) => {
                warn!(link = %link, error = %e, "Queue unavailable");
                self.reject(&job, ApiError::ServiceOffline, outcome::OFFLINE);
            }
        }
        self.refresh_gauges();
    }

    /// Looks up `link` and waits for the outcome.
    pub async fn inspect(&self, link: InspectLink) -> Result<Item, ApiError> {
        let (job, outcome) = Job::with_channel(link);
        self.submit(Arc::new(job)).await;
        outcome.await.unwrap_or(Err(ApiError::Internal))
    }

    pub fn status(&self) -> ServiceStatus {
        self.refresh_gauges();
        ServiceStatus {
            status: "OK".to_string(),
            bots_online: self.pool.ready_count(),
            bots_total: self.pool.worker_count(),
            queue_size: self.queue.len(),
            queue_workers: self.queue.capacity(),
            statistics: self.statistics(),
            bots: self.pool.statistics(),
        }
    }

    pub fn statistics(&self) -> ServiceStatistics {
        ServiceStatistics {
            requests: self.counters.requests.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Stops the queue and every worker. Jobs still pending receive
    /// `ServiceOffline`.
    pub async fn shutdown(&self) {
        let unfinished = self.queue.stop().await;
        for job in &unfinished {
            job.set_error(ApiError::ServiceOffline);
        }
        self.pool.shutdown();

        if let Some(listener) = self
            .failure_listener
            .lock()
            .expect("listener lock poisoned")
            .take()
        {
            listener.abort();
        }
        info!(unfinished = unfinished.len(), "Inspect service stopped");
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    fn reject(&self, job: &Job, error: ApiError, label: &str) {
        debug!(asset_id = job.link().asset_id, error = %error.describe(), "Rejected job");
        job.set_error(error);
        self.metrics.record_request(label);
    }

    fn refresh_gauges(&self) {
        self.metrics
            .set_gauges(self.queue.len(), self.pool.ready_count());
    }
}

async fn listen_for_failures(
    mut failures: mpsc::UnboundedReceiver<FailedJob>,
    counters: Arc<ServiceCounters>,
    metrics: ServiceMetrics,
) {
    while let Some(failed) = failures.recv().await {
        warn!(
            link = %failed.job.link(),
            attempts = failed.attempts,
            error = %failed.error,
            "Failed to inspect"
        );
        counters.errors.fetch_add(1, Ordering::Relaxed);
        metrics.record_request(outcome::FAILED);
        failed.job.set_error(failed.error.api_error());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::OwnerKind;
    use crate::item::ItemInfo;
    use crate::session::mock::MockFactory;
    use crate::session::{Credentials, Proxy};
    use crate::storage::{CacheError, MemoryItemCache};

    fn link(asset: u64) -> InspectLink {
        InspectLink::new(OwnerKind::Listing, 76561198000000000, asset, 42)
    }

    fn config(workers: usize) -> ServiceConfig {
        (0..workers).fold(ServiceConfig::new(), |config, i| {
            config.with_account(Credentials::new(format!("bot{}", i), "pw"))
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn start(
        config: ServiceConfig,
        reply_after: Option<Duration>,
    ) -> (InspectService, Arc<MockFactory>, Arc<MemoryItemCache>) {
        let factory = Arc::new(MockFactory::new(reply_after));
        let cache = Arc::new(MemoryItemCache::new());
        let service =
            InspectService::start(config, factory.clone(), cache.clone()).expect("service");
        (service, factory, cache)
    }

    struct FailingCache;

    #[async_trait]
    impl ItemCache for FailingCache {
        async fn find_by_item_id(&self, _item_id: u64) -> Result<Option<Item>, CacheError> {
            Err(CacheError::ConnectionFailed("down".to_string()))
        }

        async fn save(&self, _item: &Item) -> Result<(), CacheError> {
            Err(CacheError::ConnectionFailed("down".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_invalid_config() {
        let factory = Arc::new(MockFactory::new(None));
        let result = InspectService::start(
            ServiceConfig::new(),
            factory,
            Arc::new(MemoryItemCache::new()),
        );
        assert!(matches!(result, Err(ServiceError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_get_round_robin_proxies() {
        let proxies = vec![
            "socks5://a:1".parse::<Proxy>().expect("proxy"),
            "http://b:2".parse::<Proxy>().expect("proxy"),
        ];
        let (service, factory, _) = start(config(3).with_proxies(proxies.clone()), None);

        let assigned: Vec<_> = factory.options().into_iter().map(|o| o.proxy).collect();
        assert_eq!(
            assigned,
            vec![
                Some(proxies[0].clone()),
                Some(proxies[1].clone()),
                Some(proxies[0].clone())
            ]
        );
        assert_eq!(service.queue().capacity(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_is_delivered_and_cached() {
        let (service, _, cache) = start(config(1), Some(Duration::from_millis(100)));
        settle().await;

        let item = service.inspect(link(7)).await.expect("lookup");
        assert_eq!(item.item_id, 7);
        assert_eq!(item.s, 76561198000000000);
        assert_eq!(item.paint_index, 282);
        assert_eq!(cache.len(), 1);

        let metrics = service.metrics();
        assert_eq!(metrics.requests(outcome::QUEUED), 1);
        assert_eq!(metrics.requests(outcome::COMPLETED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_workers() {
        let (service, factory, cache) = start(config(1), Some(Duration::from_millis(100)));
        settle().await;

        let cached = Item::from_item_info(
            &link(9),
            &ItemInfo {
                item_id: 9,
                paint_wear: 0.5,
                ..Default::default()
            },
        );
        cache.save(&cached).await.expect("save");

        let item = service.inspect(link(9)).await.expect("cached");
        assert_eq!(item, cached);
        assert_eq!(factory.session(0).inspect_calls(), 0);
        assert_eq!(service.metrics().requests(outcome::CACHED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_when_no_worker_is_ready() {
        let (service, factory, _) = start(config(1), Some(Duration::from_millis(100)));
        settle().await;
        factory.session(0).disconnect();
        settle().await;

        assert_eq!(
            service.inspect(link(1)).await,
            Err(ApiError::ServiceOffline)
        );
        assert_eq!(service.metrics().requests(outcome::OFFLINE), 1);
        assert_eq!(service.statistics().requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_size_limit() {
        let (service, _, _) = start(
            config(1).with_max_queue_size(1),
            Some(Duration::from_millis(100)),
        );
        settle().await;

        // Stop the queue from draining so depth stays observable.
        service.queue().pause().expect("pause");
        settle().await;

        let (first, _first_rx) = Job::with_channel(link(1));
        service.submit(Arc::new(first)).await;
        settle().await;
        assert_eq!(service.queue().len(), 1);

        assert_eq!(service.inspect(link(2)).await, Err(ApiError::MaxQueueSize));
        assert_eq!(service.metrics().requests(outcome::QUEUE_FULL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_delivers_mapped_error() {
        let (service, factory, _) = start(config(1).with_max_attempts(2), None);
        settle().await;

        assert_eq!(service.inspect(link(3)).await, Err(ApiError::TtlExceeded));
        assert_eq!(factory.session(0).inspect_calls(), 2);

        let status = service.status();
        assert_eq!(status.statistics, ServiceStatistics { requests: 1, errors: 1 });
        assert_eq!(status.bots[0].errors, 2);
        assert_eq!(service.metrics().requests(outcome::FAILED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_failures_do_not_block_delivery() {
        let factory = Arc::new(MockFactory::new(Some(Duration::from_millis(100))));
        let service = InspectService::start(config(1), factory, Arc::new(FailingCache))
            .expect("service");
        settle().await;

        let item = service.inspect(link(5)).await.expect("lookup");
        assert_eq!(item.item_id, 5);
        assert_eq!(service.metrics().persistence_errors(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_snapshot_shape() {
        let (service, _, _) = start(config(2), Some(Duration::from_millis(100)));
        // Past the first capacity resync after login.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let json = serde_json::to_value(service.status()).expect("serialize");
        assert_eq!(json["status"], "OK");
        assert_eq!(json["botsOnline"], 2);
        assert_eq!(json["botsTotal"], 2);
        assert_eq!(json["queueSize"], 0);
        assert_eq!(json["queueWorkers"], 2);
        assert_eq!(json["statistics"]["requests"], 0);
        assert_eq!(json["bots"][1]["initialErrors"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_fails_pending_jobs() {
        let (service, _, _) = start(config(1), Some(Duration::from_millis(100)));
        settle().await;
        service.queue().pause().expect("pause");
        settle().await;

        let (job, outcome) = Job::with_channel(link(8));
        service.submit(Arc::new(job)).await;
        service.shutdown().await;

        assert_eq!(
            outcome.await.expect("delivered"),
            Err(ApiError::ServiceOffline)
        );
        assert_eq!(service.pool().ready_count(), 0);
    }
}
