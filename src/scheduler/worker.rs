//! A single worker session and its request protocol.
//!
//! A worker owns one authenticated session and tracks two flags:
//!
//! - `ready`: the coordinator link is up and inspect calls may be issued
//! - `busy`: a request is outstanding, or the worker is cooling down after one
//!
//! At most one request is outstanding per worker. A successful reply keeps
//! the worker busy until `request_delay` has passed since the request was
//! issued; a TTL expiry clears `busy` immediately.
//!
//! Readiness is published through a `watch` channel and only changes on
//! edges, so subscribers never see repeated identical values.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::RngExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::inspect::{InspectLink, InspectParams};
use crate::item::ItemInfo;
use crate::session::{
    Credentials, SecondFactor, SessionClient, SessionEvent, SessionFailure, REQUIRED_APP_ID,
};

/// Timing settings for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Minimum spacing between the starts of two requests.
    pub request_delay: Duration,
    /// How long to wait for a reply before failing the request.
    pub request_ttl: Duration,
    /// Period of the forced relogin. Zero disables it.
    pub relogin_interval: Duration,
    /// Upper bound of the random offset added to `relogin_interval`.
    pub relogin_jitter: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(1100),
            request_ttl: Duration::from_millis(2000),
            relogin_interval: Duration::from_secs(30 * 60),
            relogin_jitter: Duration::from_secs(4 * 60),
        }
    }
}

impl WorkerSettings {
    /// Sets the inter-request delay.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Sets the request TTL.
    pub fn with_request_ttl(mut self, ttl: Duration) -> Self {
        self.request_ttl = ttl;
        self
    }

    /// Sets the forced relogin period and its jitter.
    pub fn with_relogin(mut self, interval: Duration, jitter: Duration) -> Self {
        self.relogin_interval = interval;
        self.relogin_jitter = jitter;
        self
    }

    fn relogin_period(&self) -> Duration {
        let jitter_ms = u64::try_from(self.relogin_jitter.as_millis()).unwrap_or(u64::MAX);
        let offset = rand::rng().random_range(0..=jitter_ms);
        self.relogin_interval + Duration::from_millis(offset)
    }
}

/// A successful lookup, plus how long the worker will stay busy.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectResult {
    pub item_info: ItemInfo,
    /// Remaining cooldown after the reply; zero if the call took longer
    /// than the request delay.
    pub cooldown: Duration,
}

type Reply = Result<InspectResult, WorkerError>;

/// A request that has been issued to the session.
///
/// Resolves exactly once: with the item info, a TTL expiry or, if the worker
/// is shut down first, [`WorkerError::Shutdown`].
#[derive(Debug)]
pub struct PendingInspect {
    rx: oneshot::Receiver<Reply>,
}

impl PendingInspect {
    pub async fn wait(self) -> Reply {
        self.rx.await.unwrap_or(Err(WorkerError::Shutdown))
    }
}

struct InflightRequest {
    seq: u64,
    params: InspectParams,
    started: Instant,
    reply: oneshot::Sender<Reply>,
    ttl: JoinHandle<()>,
}

#[derive(Default)]
struct RequestSlot {
    next_seq: u64,
    inflight: Option<InflightRequest>,
}

struct WorkerInner {
    username: String,
    credentials: Credentials,
    settings: WorkerSettings,
    session: Arc<dyn SessionClient>,
    ready: watch::Sender<bool>,
    busy: AtomicBool,
    /// Set while a forced relogin is in progress.
    relogin: AtomicBool,
    /// Set after a fresh login until ownership data arrives.
    awaiting_ownership: AtomicBool,
    slot: Mutex<RequestSlot>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a worker. Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    /// Creates a worker around `session` and starts consuming its events.
    ///
    /// The worker does not log in until [`Worker::log_in`] is called.
    pub fn spawn(
        credentials: Credentials,
        settings: WorkerSettings,
        session: Arc<dyn SessionClient>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        let relogin_period = settings.relogin_period();

        let inner = Arc::new(WorkerInner {
            username: credentials.username.clone(),
            credentials,
            settings,
            session,
            ready,
            busy: AtomicBool::new(false),
            relogin: AtomicBool::new(false),
            awaiting_ownership: AtomicBool::new(false),
            slot: Mutex::new(RequestSlot::default()),
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = vec![tokio::spawn(run_event_loop(Arc::downgrade(&inner), events))];
        if !relogin_period.is_zero() {
            tasks.push(tokio::spawn(run_relogin_timer(
                Arc::downgrade(&inner),
                relogin_period,
            )));
        }
        inner.tasks.lock().expect("tasks lock poisoned").extend(tasks);

        Self { inner }
    }

    /// Account name of this worker.
    pub fn username(&self) -> &str {
        &self.inner.username
    }

    /// Request pacing and relogin settings this worker was created with.
    pub fn settings(&self) -> &WorkerSettings {
        &self.inner.settings
    }

    /// Whether the coordinator link is up.
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// Whether a request is outstanding or cooling down.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Whether the worker could take a request right now.
    pub fn is_free(&self) -> bool {
        self.is_ready() && !self.is_busy()
    }

    /// Subscribes to readiness changes. The receiver only observes edges.
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.inner.ready.subscribe()
    }

    /// (Re)starts the login sequence. Readiness drops until the coordinator
    /// link is established again.
    pub fn log_in(&self) {
        self.inner.log_in();
    }

    /// Claims the worker and issues an inspect call for `link`.
    ///
    /// Nothing is mutated when the call is rejected.
    ///
    /// # Errors
    ///
    /// - `WorkerError::Busy` if a request is outstanding or cooling down.
    /// - `WorkerError::NotReady` if the coordinator link is down.
    pub fn begin_request(&self, link: &InspectLink) -> Result<PendingInspect, WorkerError> {
        let inner = &self.inner;
        let params = link.parameters();

        let mut slot = inner.slot.lock().expect("request slot lock poisoned");
        if slot.inflight.is_some() || inner.busy.load(Ordering::Acquire) {
            return Err(WorkerError::Busy);
        }
        if !inner.is_ready() {
            return Err(WorkerError::NotReady);
        }

        inner.busy.store(true, Ordering::Release);
        let seq = slot.next_seq;
        slot.next_seq = slot.next_seq.wrapping_add(1);

        let (reply, rx) = oneshot::channel();
        let ttl = tokio::spawn(expire_request(
            Arc::downgrade(inner),
            seq,
            inner.settings.request_ttl,
        ));
        slot.inflight = Some(InflightRequest {
            seq,
            params,
            started: Instant::now(),
            reply,
            ttl,
        });

        debug!(worker = %inner.username, asset_id = params.a, "Fetching item");
        inner.session.request_inspect(params.owner(), params.a, params.d);

        Ok(PendingInspect { rx })
    }

    /// Issues an inspect call and waits for its outcome.
    pub async fn send_request(&self, link: &InspectLink) -> Reply {
        self.begin_request(link)?.wait().await
    }

    /// Stops background tasks, fails any outstanding request and logs off.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        for task in inner.tasks.lock().expect("tasks lock poisoned").drain(..) {
            task.abort();
        }

        let inflight = inner
            .slot
            .lock()
            .expect("request slot lock poisoned")
            .inflight
            .take();
        if let Some(request) = inflight {
            request.ttl.abort();
            let _ = request.reply.send(Err(WorkerError::Shutdown));
        }

        inner.set_ready(false);
        inner.session.log_off();
        info!(worker = %inner.username, "Worker stopped");
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("username", &self.inner.username)
            .field("ready", &self.is_ready())
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl WorkerInner {
    fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    fn set_ready(&self, ready: bool) {
        let changed = self.ready.send_if_modified(|current| {
            if *current == ready {
                return false;
            }
            *current = ready;
            true
        });
        if changed {
            debug!(worker = %self.username, ready, "Readiness changed");
        }
    }

    fn log_in(&self) {
        self.set_ready(false);
        info!(worker = %self.username, "Logging in");
        self.session.log_off();

        let details = match self.credentials.log_on_details() {
            Ok(details) => {
                if matches!(details.second_factor, Some(SecondFactor::TwoFactorCode(_))) {
                    debug!(worker = %self.username, "Derived one-time code from shared secret");
                }
                details
            }
            Err(e) => {
                error!(
                    worker = %self.username,
                    error = %e,
                    "Could not derive one-time code, logging in without it"
                );
                self.credentials.password_details()
            }
        };
        self.session.log_on(details);
    }

    fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Error(failure) => self.on_session_error(&failure),
            SessionEvent::Disconnected { eresult, message } => {
                warn!(
                    worker = %self.username,
                    eresult = ?eresult,
                    message = %message,
                    "Logged off, reconnecting"
                );
            }
            SessionEvent::LoggedOn => self.on_logged_on(),
            SessionEvent::OwnershipCached => {
                if self.awaiting_ownership.swap(false, Ordering::AcqRel) {
                    tokio::spawn(Arc::clone(self).connect_after_ownership());
                }
            }
            SessionEvent::CoordinatorConnected => {
                info!(worker = %self.username, "Coordinator link established");
                self.set_ready(true);
            }
            SessionEvent::CoordinatorDisconnected { reason } => {
                warn!(worker = %self.username, reason = %reason, "Coordinator link lost");
                self.set_ready(false);
            }
            SessionEvent::ItemInfo(info) => self.complete_request(info),
        }
    }

    fn on_session_error(&self, failure: &SessionFailure) {
        error!(
            worker = %self.username,
            eresult = ?failure.eresult,
            error = %failure,
            "Session error"
        );
        if let Some(reason) = failure.login_denial_reason() {
            error!(worker = %self.username, reason, "Login denied");
        }
        if failure.is_proxy_failure() {
            warn!(worker = %self.username, "Proxy failure, logging in again");
            self.log_in();
        }
    }

    fn on_logged_on(&self) {
        info!(worker = %self.username, "Log on OK");

        // Clear any running app so the coordinator handshake starts fresh.
        self.session.set_games_played(&[]);

        if self.relogin.swap(false, Ordering::AcqRel) {
            // Ownership data is unreliable across a relogin.
            info!(worker = %self.username, "Relogged, reconnecting to coordinator");
            self.session.set_games_played(&[REQUIRED_APP_ID]);
            return;
        }
        self.awaiting_ownership.store(true, Ordering::Release);
    }

    async fn connect_after_ownership(self: Arc<Self>) {
        if !self.session.owns_app(REQUIRED_APP_ID) {
            info!(
                worker = %self.username,
                app_id = REQUIRED_APP_ID,
                "Account does not own the app, requesting free license"
            );
            if let Err(e) = self.session.request_free_license(&[REQUIRED_APP_ID]).await {
                error!(worker = %self.username, error = %e, "Failed to obtain free license");
                return;
            }
            info!(worker = %self.username, "Free license granted");
        }

        info!(worker = %self.username, "Connecting to coordinator");
        self.session.set_games_played(&[REQUIRED_APP_ID]);
    }

    fn force_relogin(&self) {
        if !self.session.has_coordinator_link() {
            return;
        }
        info!(worker = %self.username, "Forcing periodic relogin");
        self.relogin.store(true, Ordering::Release);
        self.session.relog();
    }

    fn complete_request(self: &Arc<Self>, info: ItemInfo) {
        let request = self
            .slot
            .lock()
            .expect("request slot lock poisoned")
            .inflight
            .take_if(|request| request.params.a == info.item_id);

        let Some(request) = request else {
            debug!(
                worker = %self.username,
                item_id = info.item_id,
                "Ignoring item info with no matching request"
            );
            return;
        };

        request.ttl.abort();
        let elapsed = request.started.elapsed();
        let cooldown = self.settings.request_delay.saturating_sub(elapsed);
        debug!(
            worker = %self.username,
            asset_id = info.item_id,
            elapsed_ms = elapsed.as_millis() as u64,
            cooldown_ms = cooldown.as_millis() as u64,
            "Received item info"
        );

        // The caller may have stopped waiting.
        let _ = request.reply.send(Ok(InspectResult {
            item_info: info,
            cooldown,
        }));
        self.release_after(cooldown);
    }

    fn release_after(self: &Arc<Self>, cooldown: Duration) {
        if cooldown.is_zero() {
            self.busy.store(false, Ordering::Release);
            return;
        }
        let inner = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            if let Some(inner) = inner.upgrade() {
                inner.busy.store(false, Ordering::Release);
            }
        });
    }
}

impl Drop for WorkerInner {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

async fn run_event_loop(inner: Weak<WorkerInner>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event);
    }
}

async fn run_relogin_timer(inner: Weak<WorkerInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.force_relogin();
    }
}

async fn expire_request(inner: Weak<WorkerInner>, seq: u64, ttl: Duration) {
    tokio::time::sleep(ttl).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let expired = {
        let mut slot = inner.slot.lock().expect("request slot lock poisoned");
        let expired = slot.inflight.take_if(|request| request.seq == seq);
        if expired.is_some() {
            inner.busy.store(false, Ordering::Release);
        }
        expired
    };

    if let Some(request) = expired {
        warn!(
            worker = %inner.username,
            asset_id = request.params.a,
            ttl_ms = ttl.as_millis() as u64,
            "Inspect request exceeded TTL"
        );
        let _ = request.reply.send(Err(WorkerError::TtlExceeded(ttl)));
    }
}
