//! Prometheus metrics registration and export.
//!
//! Each [`ServiceMetrics`] owns its own registry, so several services (or
//! tests) in one process never collide on metric names.

use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Outcome label values for `inspect_requests_total`.
pub mod outcome {
    pub const CACHED: &str = "cached";
    pub const QUEUED: &str = "queued";
    pub const OFFLINE: &str = "offline";
    pub const QUEUE_FULL: &str = "queue_full";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

/// Metrics recorded by an inspect service.
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    persistence_errors: IntCounter,
    queue_depth: IntGauge,
    workers_ready: IntGauge,
    lookup_duration: Histogram,
}

impl ServiceMetrics {
    /// Creates all metrics and registers them with a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if a metric definition is invalid.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("inspect_requests_total", "Inspect requests by outcome"),
            &["outcome"],
        )?;

        let persistence_errors = IntCounter::new(
            "inspect_persistence_errors_total",
            "Lookup results that could not be written to the item cache",
        )?;

        let queue_depth = IntGauge::new("inspect_queue_depth", "Jobs waiting in the queue")?;

        let workers_ready = IntGauge::new(
            "inspect_workers_ready",
            "Workers with a live coordinator link",
        )?;

        let lookup_duration = Histogram::with_opts(
            HistogramOpts::new(
                "inspect_lookup_duration_seconds",
                "Time from submission to a delivered remote lookup",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(persistence_errors.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(workers_ready.clone()))?;
        registry.register(Box::new(lookup_duration.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            persistence_errors,
            queue_depth,
            workers_ready,
            lookup_duration,
        })
    }

    /// Counts one request with the given outcome label.
    pub fn record_request(&self, outcome: &str) {
        self.requests_total.with_label_values(&[outcome]).inc();
    }

    pub fn requests(&self, outcome: &str) -> u64 {
        self.requests_total.with_label_values(&[outcome]).get()
    }

    pub fn record_persistence_error(&self) {
        self.persistence_errors.inc();
    }

    pub fn persistence_errors(&self) -> u64 {
        self.persistence_errors.get()
    }

    /// Records a completed remote lookup.
    pub fn record_lookup(&self, elapsed: Duration) {
        self.lookup_duration.observe(elapsed.as_secs_f64());
    }

    /// Updates the queue depth and ready-worker gauges.
    pub fn set_gauges(&self, queue_depth: usize, workers_ready: usize) {
        self.queue_depth.set(queue_depth as i64);
        self.workers_ready.set(workers_ready as i64);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Exports all metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}\n", e);
        }

        String::from_utf8(buffer)
            .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
    }
}

impl std::fmt::Debug for ServiceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMetrics").finish_non_exhaustive()
    }
}
