//! Error types for inspect dispatch.
//!
//! Defines the error kinds surfaced by each layer:
//! - `ApiError`: stable, user-facing failure kinds with numeric codes
//! - `WorkerError`: failures of a single session's request protocol
//! - `DispatchError`: pool-level dispatch failures, as seen by the queue

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// User-facing failure kinds.
///
/// Every externally observable failure of a lookup resolves to exactly one
/// of these. The numeric code and HTTP status are stable and meant to be
/// surfaced verbatim by a request-handling layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ApiError {
    #[error("Improper Parameter Structure")]
    BadParams,

    #[error("Invalid Inspect Link Structure")]
    InvalidInspect,

    #[error("You have too many pending requests")]
    MaxRequests,

    #[error("The game coordinator didn't reply in time")]
    TtlExceeded,

    #[error("The game coordinator appears to be offline, please try again later")]
    ServiceOffline,

    #[error("Something went wrong on our end, please try again")]
    Internal,

    #[error("Improper body format")]
    BadBody,

    #[error("Bad Secret")]
    BadSecret,

    #[error("No workers available to fulfill this request")]
    NoWorkersAvailable,

    #[error("Rate limit exceeded, too many requests")]
    RateLimit,

    #[error("Queue size is full, please try again later")]
    MaxQueueSize,

    #[error("Database error")]
    Database,
}

impl ApiError {
    /// Stable numeric code of this error kind.
    pub fn code(&self) -> u16 {
        match self {
            ApiError::BadParams => 1,
            ApiError::InvalidInspect => 2,
            ApiError::MaxRequests => 3,
            ApiError::TtlExceeded => 4,
            ApiError::ServiceOffline => 5,
            ApiError::Internal => 6,
            ApiError::BadBody => 7,
            ApiError::BadSecret => 8,
            ApiError::NoWorkersAvailable => 9,
            ApiError::RateLimit => 10,
            ApiError::MaxQueueSize => 11,
            ApiError::Database => 12,
        }
    }

    /// HTTP status code a request-handling layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadParams
            | ApiError::InvalidInspect
            | ApiError::MaxRequests
            | ApiError::BadBody
            | ApiError::BadSecret => 400,
            ApiError::RateLimit => 429,
            ApiError::ServiceOffline => 503,
            ApiError::TtlExceeded
            | ApiError::Internal
            | ApiError::NoWorkersAvailable
            | ApiError::MaxQueueSize
            | ApiError::Database => 500,
        }
    }

    /// Serializable response body: `{"error": message, "code": code}`.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            code: self.code(),
        }
    }

    /// Short form used in log lines, e.g. `[Code 4] - ...`.
    pub fn describe(&self) -> String {
        format!("[Code {}] - {}", self.code(), self)
    }
}

/// JSON body for an [`ApiError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: u16,
}

/// Errors from a single worker's request protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// The worker has no live coordinator link.
    #[error("worker is not ready")]
    NotReady,

    /// A request is outstanding or the worker is cooling down.
    #[error("worker is busy")]
    Busy,

    /// The coordinator did not answer within the request TTL.
    #[error("ttl exceeded after {0:?}")]
    TtlExceeded(Duration),

    /// The worker stopped before the request completed.
    #[error("worker shut down")]
    Shutdown,
}

/// Errors from a pool-level dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No worker was ready and free at selection time.
    ///
    /// This is infrastructure unavailability, so the queue does not count
    /// it against a job's attempts.
    #[error("no workers available")]
    NoWorkersAvailable,

    /// The selected worker failed the request.
    #[error("worker request failed: {0}")]
    Worker(#[from] WorkerError),
}

impl DispatchError {
    /// Maps this failure to the user-facing kind delivered to a job.
    pub fn api_error(&self) -> ApiError {
        match self {
            DispatchError::NoWorkersAvailable => ApiError::NoWorkersAvailable,
            DispatchError::Worker(WorkerError::TtlExceeded(_)) => ApiError::TtlExceeded,
            DispatchError::Worker(WorkerError::NotReady) => ApiError::ServiceOffline,
            DispatchError::Worker(WorkerError::Busy | WorkerError::Shutdown) => ApiError::Internal,
        }
    }

    /// Whether the queue should count this failure as an attempt.
    pub fn counts_as_attempt(&self) -> bool {
        !matches!(self, DispatchError::NoWorkersAvailable)
    }
}
