//! Jobs: one pending lookup and its completion contract.
//!
//! A job completes at most once. Whichever of [`Job::set_result`] and
//! [`Job::set_error`] runs first wins; every later call is a silent no-op.
//! This keeps delivery exactly-once when independent paths race, e.g. a
//! cache hit, a worker reply and a terminal retry failure.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ApiError;
use crate::inspect::InspectLink;
use crate::item::Item;

/// Outcome delivered through a [`ChannelSink`].
pub type JobOutcome = Result<Item, ApiError>;

/// Where a job's outcome goes. Opaque to the scheduler.
pub trait DeliverySink: Send + Sync {
    fn deliver_result(&self, item: Item);
    fn deliver_error(&self, error: ApiError);
}

/// Sink that forwards the outcome to a oneshot channel.
pub struct ChannelSink {
    tx: Mutex<Option<oneshot::Sender<JobOutcome>>>,
}

impl ChannelSink {
    pub fn channel() -> (Self, oneshot::Receiver<JobOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    fn send(&self, outcome: JobOutcome) {
        let tx = self.tx.lock().expect("sink lock poisoned").take();
        if let Some(tx) = tx {
            // The caller may have stopped waiting.
            let _ = tx.send(outcome);
        }
    }
}

impl DeliverySink for ChannelSink {
    fn deliver_result(&self, item: Item) {
        self.send(Ok(item));
    }

    fn deliver_error(&self, error: ApiError) {
        self.send(Err(error));
    }
}

/// A single pending lookup.
pub struct Job {
    id: Uuid,
    link: InspectLink,
    created_at: DateTime<Utc>,
    done: AtomicBool,
    sink: Box<dyn DeliverySink>,
}

impl Job {
    /// Creates a job that delivers into `sink`.
    pub fn new(link: InspectLink, sink: impl DeliverySink + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            link,
            created_at: Utc::now(),
            done: AtomicBool::new(false),
            sink: Box::new(sink),
        }
    }

    /// Creates a job together with the receiver its outcome arrives on.
    pub fn with_channel(link: InspectLink) -> (Self, oneshot::Receiver<JobOutcome>) {
        let (sink, rx) = ChannelSink::channel();
        (Self::new(link, sink), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn link(&self) -> &InspectLink {
        &self.link
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether an outcome has been delivered.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Delivers a result. Returns `false` if the job was already complete.
    pub fn set_result(&self, item: Item) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.sink.deliver_result(item);
        true
    }

    /// Delivers an error. Returns `false` if the job was already complete.
    pub fn set_error(&self, error: ApiError) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.sink.deliver_error(error);
        true
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("link", &self.link)
            .field("done", &self.is_done())
            .finish()
    }
}
