//! Scripted in-memory session for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::item::ItemInfo;

use super::client::{SessionClient, SessionEvent, SessionFactory, SessionFailure, REQUIRED_APP_ID};
use super::credentials::{LogOnDetails, SessionOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionCall {
    LogOn(String),
    LogOff,
    Relog,
    FreeLicense(Vec<u32>),
    GamesPlayed(Vec<u32>),
    Inspect { owner: u64, asset: u64, d: u64 },
}

/// Records calls and lets tests push events.
///
/// With `auto_connect` set, log-on succeeds on its own and launching the
/// required app brings the coordinator link up. With `reply_after` set, each
/// inspect call is answered after that delay.
pub(crate) struct MockSession {
    events: mpsc::UnboundedSender<SessionEvent>,
    calls: Mutex<Vec<SessionCall>>,
    linked: AtomicBool,
    owns_app: AtomicBool,
    license_fails: AtomicBool,
    auto_connect: AtomicBool,
    reply_after: Mutex<Option<Duration>>,
}

impl MockSession {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            events,
            calls: Mutex::new(Vec::new()),
            linked: AtomicBool::new(false),
            owns_app: AtomicBool::new(true),
            license_fails: AtomicBool::new(false),
            auto_connect: AtomicBool::new(false),
            reply_after: Mutex::new(None),
        });
        (session, rx)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub(crate) fn inspect_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SessionCall::Inspect { .. }))
            .count()
    }

    pub(crate) fn set_owns_app(&self, owns: bool) {
        self.owns_app.store(owns, Ordering::SeqCst);
    }

    pub(crate) fn set_license_fails(&self, fails: bool) {
        self.license_fails.store(fails, Ordering::SeqCst);
    }

    pub(crate) fn set_linked(&self, linked: bool) {
        self.linked.store(linked, Ordering::SeqCst);
    }

    pub(crate) fn set_auto_connect(&self, auto: bool) {
        self.auto_connect.store(auto, Ordering::SeqCst);
    }

    pub(crate) fn set_reply_after(&self, delay: Option<Duration>) {
        *self.reply_after.lock().expect("reply lock poisoned") = delay;
    }

    /// Drops the coordinator link as the remote side would.
    pub(crate) fn disconnect(&self) {
        self.linked.store(false, Ordering::SeqCst);
        self.emit(SessionEvent::CoordinatorDisconnected {
            reason: "test".to_string(),
        });
    }

    fn record(&self, call: SessionCall) {
        self.calls.lock().expect("calls lock poisoned").push(call);
    }

    fn auto(&self) -> bool {
        self.auto_connect.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionClient for MockSession {
    fn log_on(&self, details: LogOnDetails) {
        self.record(SessionCall::LogOn(details.account_name));
        if self.auto() {
            self.emit(SessionEvent::LoggedOn);
            self.emit(SessionEvent::OwnershipCached);
        }
    }

    fn log_off(&self) {
        self.record(SessionCall::LogOff);
        self.linked.store(false, Ordering::SeqCst);
    }

    fn relog(&self) {
        self.record(SessionCall::Relog);
        if self.auto() {
            self.disconnect();
            self.emit(SessionEvent::LoggedOn);
        }
    }

    fn has_coordinator_link(&self) -> bool {
        self.linked.load(Ordering::SeqCst)
    }

    fn owns_app(&self, _app_id: u32) -> bool {
        self.owns_app.load(Ordering::SeqCst)
    }

    async fn request_free_license(&self, app_ids: &[u32]) -> Result<(), SessionFailure> {
        self.record(SessionCall::FreeLicense(app_ids.to_vec()));
        if self.license_fails.load(Ordering::SeqCst) {
            return Err(SessionFailure::new("license denied").with_eresult(2));
        }
        self.owns_app.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_games_played(&self, app_ids: &[u32]) {
        self.record(SessionCall::GamesPlayed(app_ids.to_vec()));
        if self.auto() && app_ids.contains(&REQUIRED_APP_ID) {
            self.linked.store(true, Ordering::SeqCst);
            self.emit(SessionEvent::CoordinatorConnected);
        }
    }

    fn request_inspect(&self, owner_id: u64, asset_id: u64, auth_token: u64) {
        self.record(SessionCall::Inspect {
            owner: owner_id,
            asset: asset_id,
            d: auth_token,
        });
        let delay = *self.reply_after.lock().expect("reply lock poisoned");
        if let Some(delay) = delay {
            let events = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(SessionEvent::ItemInfo(ItemInfo {
                    item_id: asset_id,
                    def_index: 7,
                    paint_index: 282,
                    paint_wear: 0.25,
                    ..Default::default()
                }));
            });
        }
    }
}

/// Hands out auto-connecting mock sessions and keeps them for inspection.
pub(crate) struct MockFactory {
    reply_after: Option<Duration>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    options: Mutex<Vec<SessionOptions>>,
}

impl MockFactory {
    pub(crate) fn new(reply_after: Option<Duration>) -> Self {
        Self {
            reply_after,
            sessions: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn session(&self, index: usize) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock().expect("sessions lock poisoned")[index])
    }

    pub(crate) fn options(&self) -> Vec<SessionOptions> {
        self.options.lock().expect("options lock poisoned").clone()
    }
}

impl SessionFactory for MockFactory {
    fn create(
        &self,
        options: &SessionOptions,
    ) -> (Arc<dyn SessionClient>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (session, events) = MockSession::new();
        session.set_auto_connect(true);
        session.set_reply_after(self.reply_after);
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .push(Arc::clone(&session));
        self.options
            .lock()
            .expect("options lock poisoned")
            .push(options.clone());
        (session, events)
    }
}
