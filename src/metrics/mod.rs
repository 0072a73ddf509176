//! Prometheus metrics for the inspect service.
//!
//! # Example
//!
//! ```ignore
//! use inspect_dispatch::metrics::{outcome, ServiceMetrics};
//!
//! let metrics = ServiceMetrics::new()?;
//! metrics.record_request(outcome::CACHED);
//!
//! // Text exposition format, ready to serve on /metrics
//! let text = metrics.export();
//! ```

pub mod prometheus;

pub use self::prometheus::{outcome, ServiceMetrics};
