//! Common Test Utilities
//!
//! Shared fixtures: forged credentials, recording surfaces, scripted
//! transports, and a fully wired runtime harness.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use session_core::application::refresh::{RefreshFailure, RefreshTransport};
use session_core::config::{
    EndpointSettings, RealtimeSettings, SessionSettings, Settings, StorageSettings,
};
use session_core::domain::collaborators::{
    AlertSurface, Navigator, NotificationFetcher, SessionProvider,
};
use session_core::domain::credential::{Claims, Credential};
use session_core::domain::notification::Notification;
use session_core::infrastructure::http::{ApiRequest, ApiResponse, HttpExecute};
use session_core::infrastructure::realtime::{
    ClientMessage, ConnectError, RealtimeConnection, RealtimeTransport, ServerEvent,
};
use session_core::infrastructure::storage::{KeyChange, MemorySharedStore, RuntimeId, SharedStore};
use session_core::shared::error::SessionError;
use session_core::startup::SessionRuntime;

/// Forge a bearer token whose claims expire `exp_offset` seconds from now.
pub fn forge_token(exp_offset: i64) -> Credential {
    let now = Utc::now().timestamp();
    forge_token_with("7", now, now + exp_offset)
}

pub fn forge_token_with(sub: &str, iat: i64, exp: i64) -> Credential {
    let claims = Claims {
        sub: sub.to_string(),
        role: Some("member".to_string()),
        iat,
        exp,
    };
    Credential::new(
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"integration-test-secret"),
        )
        .expect("encoding test token"),
    )
}

pub fn notification(id: &str, offset_secs: i64) -> Notification {
    Notification {
        id: id.to_string(),
        kind: "booking".to_string(),
        title: format!("title-{}", id),
        message: "hello".to_string(),
        read: false,
        created_at: Utc::now() + chrono::Duration::seconds(offset_secs),
    }
}

/// Settings used by every harness; short cool-downs, standard thresholds.
pub fn test_settings() -> Settings {
    Settings {
        session: SessionSettings {
            warning_threshold_secs: 300,
            refresh_cooldown_secs: 10,
            safety_tick_secs: 60,
            logout_guard_ttl_secs: 10,
        },
        endpoints: EndpointSettings {
            base_url: "http://localhost:3000".into(),
            refresh_path: "/auth/refresh-token".into(),
            notifications_path: "/notifications".into(),
            realtime_url: "ws://localhost:3000/realtime".into(),
            public_prefixes: vec!["/auth".into(), "/public".into()],
        },
        storage: StorageSettings {
            auth_token_key: "authToken".into(),
            current_user_key: "currentUser".into(),
            return_url_key: "returnUrl".into(),
        },
        realtime: RealtimeSettings {
            backoff_base_ms: 1000,
            backoff_cap_ms: 30000,
            in_place_reauth: true,
        },
        environment: "test".into(),
    }
}

/// Let spawned lifecycle tasks drain their queues without advancing time.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Shared store whose silent mutators skip the change broadcast, standing in
/// for another runtime's write that this runtime's subscription missed. The
/// trait methods behave like `MemorySharedStore`.
pub struct QuietStore {
    entries: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<KeyChange>,
}

impl QuietStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: Mutex::new(HashMap::new()),
            changes,
        }
    }

    pub fn silent_set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }

    pub fn silent_remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

impl SharedStore for QuietStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, writer: RuntimeId, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
        let _ = self.changes.send(KeyChange {
            key: key.to_string(),
            new_value: Some(value.to_string()),
            writer,
        });
    }

    fn remove(&self, writer: RuntimeId, key: &str) {
        self.entries.lock().remove(key);
        let _ = self.changes.send(KeyChange {
            key: key.to_string(),
            new_value: None,
            writer,
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<KeyChange> {
        self.changes.subscribe()
    }
}

// --- Recording surfaces ---

#[derive(Default)]
pub struct RecordingAlerts {
    pub warnings: AtomicUsize,
    pub dismissals: AtomicUsize,
    pub expired: AtomicUsize,
}

impl AlertSurface for RecordingAlerts {
    fn show_expiry_warning(&self) {
        self.warnings.fetch_add(1, Ordering::SeqCst);
    }

    fn dismiss_expiry_warning(&self) {
        self.dismissals.fetch_add(1, Ordering::SeqCst);
    }

    fn show_session_expired(&self) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct RecordingNavigator {
    pub location: Mutex<String>,
    pub logins: AtomicUsize,
}

impl Default for RecordingNavigator {
    fn default() -> Self {
        Self {
            location: Mutex::new("/bookings/42".to_string()),
            logins: AtomicUsize::new(0),
        }
    }
}

impl Navigator for RecordingNavigator {
    fn current_location(&self) -> String {
        self.location.lock().clone()
    }

    fn navigate_to_login(&self) {
        self.logins.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingSession {
    pub claims: Mutex<Option<Claims>>,
    pub updates: AtomicUsize,
    pub clears: AtomicUsize,
}

impl SessionProvider for RecordingSession {
    fn current_session(&self) -> Option<Claims> {
        self.claims.lock().clone()
    }

    fn update(&self, claims: &Claims) {
        *self.claims.lock() = Some(claims.clone());
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn clear(&self) {
        *self.claims.lock() = None;
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

// --- Scripted transports ---

/// Refresh transport with a scripted outcome queue; defaults to issuing a
/// week-long replacement credential. Yields once so concurrent callers can
/// pile onto the in-flight attempt.
#[derive(Default)]
pub struct ScriptedRefresh {
    pub calls: AtomicUsize,
    pub script: Mutex<VecDeque<Result<Credential, RefreshFailure>>>,
}

impl ScriptedRefresh {
    pub fn push(&self, outcome: Result<Credential, RefreshFailure>) {
        self.script.lock().push_back(outcome);
    }
}

#[async_trait]
impl RefreshTransport for ScriptedRefresh {
    async fn refresh(&self, _current: &Credential) -> Result<Credential, RefreshFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        match self.script.lock().pop_front() {
            Some(outcome) => outcome,
            None => Ok(forge_token(604_800)),
        }
    }
}

/// HTTP executor answering from a scripted queue (default 200 with an empty
/// object body); records every request it saw.
#[derive(Default)]
pub struct ScriptedExecutor {
    pub requests: Mutex<Vec<ApiRequest>>,
    pub script: Mutex<VecDeque<ApiResponse>>,
}

impl ScriptedExecutor {
    pub fn push_status(&self, status: u16) {
        self.script.lock().push_back(ApiResponse {
            status,
            body: serde_json::Value::Null,
        });
    }

    pub fn always_status(&self, status: u16, copies: usize) {
        for _ in 0..copies {
            self.push_status(status);
        }
    }

    pub fn bearers_seen(&self) -> Vec<Option<String>> {
        self.requests.lock().iter().map(|r| r.bearer.clone()).collect()
    }
}

#[async_trait]
impl HttpExecute for ScriptedExecutor {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        self.requests.lock().push(request);
        tokio::task::yield_now().await;
        Ok(self.script.lock().pop_front().unwrap_or(ApiResponse {
            status: 200,
            body: serde_json::json!({}),
        }))
    }
}

/// Notification fetcher returning a fixed list.
#[derive(Default)]
pub struct StaticFetcher {
    pub calls: AtomicUsize,
    pub records: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationFetcher for StaticFetcher {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.lock().clone())
    }
}

// --- Fake realtime transport ---

struct FakeRealtimeInner {
    connects: AtomicUsize,
    reject_next: AtomicUsize,
    fail_next: AtomicUsize,
    supports_reauth: AtomicBool,
    tokens: Mutex<Vec<String>>,
    sent: Mutex<Vec<ClientMessage>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<ServerEvent>>>,
}

/// In-memory realtime transport: the test drives the server side (push
/// events, drop the connection, reject handshakes) and observes everything
/// the channel manager sends.
#[derive(Clone)]
pub struct FakeRealtime {
    inner: Arc<FakeRealtimeInner>,
}

impl FakeRealtime {
    pub fn new(supports_reauth: bool) -> Self {
        Self {
            inner: Arc::new(FakeRealtimeInner {
                connects: AtomicUsize::new(0),
                reject_next: AtomicUsize::new(0),
                fail_next: AtomicUsize::new(0),
                supports_reauth: AtomicBool::new(supports_reauth),
                tokens: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                inbound: Mutex::new(None),
            }),
        }
    }

    pub fn reject_next_handshakes(&self, count: usize) {
        self.inner.reject_next.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.inner.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.inner.tokens.lock().clone()
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.inner.sent.lock().clone()
    }

    pub fn auth_frames(&self) -> Vec<String> {
        self.inner
            .sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                ClientMessage::Auth { token } => Some(token.clone()),
                _ => None,
            })
            .collect()
    }

    /// Push an event from the "server" down the current connection.
    pub fn push(&self, event: ServerEvent) {
        if let Some(tx) = self.inner.inbound.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Sever the current connection as if the network dropped.
    pub fn drop_connection(&self) {
        *self.inner.inbound.lock() = None;
    }
}

#[async_trait]
impl RealtimeTransport for FakeRealtime {
    async fn connect(&self, token: &str) -> Result<Box<dyn RealtimeConnection>, ConnectError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.tokens.lock().push(token.to_string());
        tokio::task::yield_now().await;

        let pending = self.inner.reject_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.inner.reject_next.store(pending - 1, Ordering::SeqCst);
            return Err(ConnectError::AuthRejected("401 Unauthorized".into()));
        }
        let failing = self.inner.fail_next.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner.fail_next.store(failing - 1, Ordering::SeqCst);
            return Err(ConnectError::Transport("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.inbound.lock() = Some(tx);
        Ok(Box::new(FakeConnection {
            inner: self.inner.clone(),
            inbound: rx,
            closed: false,
        }))
    }
}

struct FakeConnection {
    inner: Arc<FakeRealtimeInner>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
    closed: bool,
}

#[async_trait]
impl RealtimeConnection for FakeConnection {
    fn supports_reauth(&self) -> bool {
        self.inner.supports_reauth.load(Ordering::SeqCst)
    }

    async fn send(&mut self, message: ClientMessage) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Transport("connection closed".into()));
        }
        self.inner.sent.lock().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ServerEvent, SessionError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

// --- Wired harness ---

pub struct Harness {
    pub runtime: SessionRuntime,
    pub shared: Arc<dyn SharedStore>,
    pub refresh: Arc<ScriptedRefresh>,
    pub executor: Arc<ScriptedExecutor>,
    pub alerts: Arc<RecordingAlerts>,
    pub navigator: Arc<RecordingNavigator>,
    pub session: Arc<RecordingSession>,
    pub realtime: FakeRealtime,
    pub fetcher: Arc<StaticFetcher>,
}

pub async fn harness() -> Harness {
    harness_with(Arc::new(MemorySharedStore::new()), true).await
}

pub async fn harness_with(shared: Arc<dyn SharedStore>, in_place_reauth: bool) -> Harness {
    let mut settings = test_settings();
    settings.realtime.in_place_reauth = in_place_reauth;

    let refresh = Arc::new(ScriptedRefresh::default());
    let executor = Arc::new(ScriptedExecutor::default());
    let alerts = Arc::new(RecordingAlerts::default());
    let navigator = Arc::new(RecordingNavigator::default());
    let session = Arc::new(RecordingSession::default());
    let realtime = FakeRealtime::new(in_place_reauth);
    let fetcher = Arc::new(StaticFetcher::default());

    let runtime = SessionRuntime::builder(settings)
        .with_shared_store(shared.clone())
        .with_session_provider(session.clone())
        .with_alerts(alerts.clone())
        .with_navigator(navigator.clone())
        .with_executor(executor.clone())
        .with_refresh_transport(refresh.clone())
        .with_realtime_transport(Arc::new(realtime.clone()))
        .with_notification_fetcher(fetcher.clone())
        .build()
        .await
        .expect("building test runtime");

    Harness {
        runtime,
        shared,
        refresh,
        executor,
        alerts,
        navigator,
        session,
        realtime,
        fetcher,
    }
}
