//! inspect-dispatch: routes item inspect lookups through rate-limited game
//! coordinator sessions.
//!
//! Each configured account runs as a [`Worker`](scheduler::Worker) with at
//! most one request in flight and a per-request cooldown. A
//! [`JobQueue`](scheduler::JobQueue) matches pending lookups to free workers,
//! retries failures and holds back while no worker is available. Results
//! are cached by item id so repeat lookups never reach a worker.
//!
//! [`InspectService`] wires these together behind a single `submit` call.

pub mod config;
pub mod error;
pub mod inspect;
pub mod item;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod storage;

// Re-export the types most callers need
pub use config::{ConfigError, ServiceConfig};
pub use error::{ApiError, DispatchError, WorkerError};
pub use inspect::{InspectLink, OwnerKind};
pub use item::Item;
pub use service::{InspectService, ServiceError, ServiceStatus};
