//! Session monitoring.
//!
//! The top-level watchdog: owns the `Inactive → Active → Warning → Expired`
//! state machine, drives the expiry scheduler, reconciles against durable
//! storage on focus and on a coarse safety tick, reacts to cross-runtime
//! logout signals, and is the only component allowed to perform
//! user-visible action (toasts, navigation).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};

use crate::application::refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome};
use crate::application::scheduler::ExpiryScheduler;
use crate::config::{SessionSettings, StorageSettings};
use crate::domain::collaborators::{AlertSurface, Navigator};
use crate::domain::credential::Credential;
use crate::infrastructure::http::LogoutGuard;
use crate::infrastructure::realtime::ChannelHandle;
use crate::infrastructure::storage::{CredentialStore, KeyChange, SharedStore, TabStore};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No authenticated session (public route or pre-login).
    Inactive,
    /// Armed and watching.
    Active,
    /// Within the warning threshold; refresh underway or failing.
    Warning,
    /// Terminal for this credential; the logout sequence has run.
    Expired,
}

/// Why the logout sequence runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogoutReason {
    /// Local expiry, unrecoverable refresh, or an unauthorized response.
    Expired,
    /// Another runtime cleared the durable credential; do not re-propagate.
    RemoteSignal,
    /// User-initiated logout; no "session expired" notice.
    Manual,
}

/// Events consumed by the monitor loop.
#[derive(Debug)]
pub enum MonitorEvent {
    /// An authenticated session begins (login response or page load with a
    /// stored credential).
    SessionStarted(Credential),
    /// The runtime regained focus; reconcile and re-arm.
    FocusRegained,
    /// The scheduler crossed the warning threshold.
    WarningThresholdCrossed,
    /// A coalesced refresh resolved successfully.
    RefreshSucceeded,
    /// A coalesced refresh failed.
    RefreshFailed(RefreshFailure),
    /// Claims observed with no time left.
    CredentialExpired,
    /// The HTTP layer saw the authoritative unauthorized response.
    Unauthorized,
    /// Manual "refresh now" action from the warning surface.
    RefreshNowRequested,
    /// User-initiated logout.
    LogoutRequested,
    /// Tear the monitor down.
    Shutdown,
}

/// Cloneable handle for feeding events into a running monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    events: mpsc::UnboundedSender<MonitorEvent>,
    state: watch::Receiver<SessionState>,
}

impl MonitorHandle {
    pub fn session_started(&self, credential: Credential) {
        let _ = self.events.send(MonitorEvent::SessionStarted(credential));
    }

    pub fn focus_regained(&self) {
        let _ = self.events.send(MonitorEvent::FocusRegained);
    }

    pub fn refresh_now(&self) {
        let _ = self.events.send(MonitorEvent::RefreshNowRequested);
    }

    pub fn logout(&self) {
        let _ = self.events.send(MonitorEvent::LogoutRequested);
    }

    pub fn unauthorized(&self) {
        let _ = self.events.send(MonitorEvent::Unauthorized);
    }

    pub fn shutdown(&self) {
        let _ = self.events.send(MonitorEvent::Shutdown);
    }

    /// Current lifecycle state; the receiver can also be awaited for
    /// transitions.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

pub struct SessionMonitor {
    store: Arc<CredentialStore>,
    scheduler: Arc<ExpiryScheduler>,
    coordinator: Arc<RefreshCoordinator>,
    shared: Arc<dyn SharedStore>,
    tab_store: Arc<TabStore>,
    alerts: Arc<dyn AlertSurface>,
    navigator: Arc<dyn Navigator>,
    logout_guard: Arc<LogoutGuard>,
    channel: Option<ChannelHandle>,
    keys: StorageSettings,
    safety_tick: Duration,

    events: mpsc::UnboundedReceiver<MonitorEvent>,
    state_tx: watch::Sender<SessionState>,
    /// Credential version the warning toast was shown for, if any.
    warning_shown_for: Option<u64>,
}

impl SessionMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<CredentialStore>,
        scheduler: Arc<ExpiryScheduler>,
        coordinator: Arc<RefreshCoordinator>,
        shared: Arc<dyn SharedStore>,
        tab_store: Arc<TabStore>,
        alerts: Arc<dyn AlertSurface>,
        navigator: Arc<dyn Navigator>,
        logout_guard: Arc<LogoutGuard>,
        channel: Option<ChannelHandle>,
        keys: StorageSettings,
        settings: &SessionSettings,
        events: (
            mpsc::UnboundedSender<MonitorEvent>,
            mpsc::UnboundedReceiver<MonitorEvent>,
        ),
    ) -> (Self, MonitorHandle) {
        let (state_tx, state_rx) = watch::channel(SessionState::Inactive);
        let (events_tx, events_rx) = events;
        let monitor = Self {
            store,
            scheduler,
            coordinator,
            shared,
            tab_store,
            alerts,
            navigator,
            logout_guard,
            channel,
            keys,
            safety_tick: settings.safety_tick(),
            events: events_rx,
            state_tx,
            warning_shown_for: None,
        };
        let handle = MonitorHandle {
            events: events_tx,
            state: state_rx,
        };
        (monitor, handle)
    }

    /// Run the monitor loop until shutdown.
    pub async fn run(mut self) {
        let mut changes = self.shared.subscribe();
        let mut tick = tokio::time::interval(self.safety_tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick completes immediately; consume it.
        tick.tick().await;

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => {
                            if !self.handle_event(event).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                change = changes.recv() => {
                    match change {
                        Ok(change) => self.handle_key_change(change).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "storage change stream lagged, reconciling");
                            self.reconcile().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = tick.tick() => {
                    self.reconcile().await;
                }
            }
        }
        tracing::debug!("session monitor stopped");
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: SessionState) {
        if self.state() != state {
            tracing::info!(from = ?self.state(), to = ?state, "session state transition");
            self.state_tx.send_replace(state);
        }
    }

    async fn handle_event(&mut self, event: MonitorEvent) -> bool {
        match event {
            MonitorEvent::SessionStarted(credential) => {
                match self.store.install(credential) {
                    Ok(versioned) => {
                        self.warning_shown_for = None;
                        self.logout_guard.release();
                        self.set_state(SessionState::Active);
                        self.scheduler.arm(&versioned.claims);
                    }
                    Err(_) => {
                        // An unauthenticated visitor with a garbage token is
                        // a normal state; just skip scheduling.
                        tracing::debug!("session start with malformed credential, staying inactive");
                    }
                }
            }
            MonitorEvent::FocusRegained => self.reconcile().await,
            MonitorEvent::WarningThresholdCrossed => {
                if self.state() == SessionState::Active {
                    self.set_state(SessionState::Warning);
                }
            }
            MonitorEvent::RefreshSucceeded => self.on_refresh_success(),
            MonitorEvent::RefreshFailed(RefreshFailure::Network(reason)) => {
                tracing::warn!(%reason, "refresh failed transiently");
                self.surface_warning_once();
            }
            MonitorEvent::RefreshFailed(RefreshFailure::Rejected(reason)) => {
                tracing::warn!(%reason, "refresh rejected by server");
                self.expire(LogoutReason::Expired).await;
            }
            MonitorEvent::CredentialExpired => self.expire(LogoutReason::Expired).await,
            MonitorEvent::Unauthorized => self.expire(LogoutReason::Expired).await,
            MonitorEvent::RefreshNowRequested => {
                match self.coordinator.request_refresh().await {
                    RefreshOutcome::Refreshed(versioned) => {
                        self.on_refresh_success();
                        self.scheduler.arm(&versioned.claims);
                    }
                    RefreshOutcome::Failed(RefreshFailure::Rejected(_)) => {
                        self.expire(LogoutReason::Expired).await;
                    }
                    RefreshOutcome::Failed(RefreshFailure::Network(_)) => {
                        self.surface_warning_once();
                    }
                }
            }
            MonitorEvent::LogoutRequested => self.expire(LogoutReason::Manual).await,
            MonitorEvent::Shutdown => {
                self.scheduler.cancel();
                if let Some(channel) = &self.channel {
                    channel.close();
                }
                return false;
            }
        }
        true
    }

    async fn handle_key_change(&mut self, change: KeyChange) {
        if change.writer == self.store.runtime_id() {
            return;
        }
        if change.key != self.keys.auth_token_key {
            return;
        }
        match change.new_value {
            // Last-writer-wins logout propagation: never attempt a refresh
            // of our own once another runtime has logged out.
            None => {
                if matches!(self.state(), SessionState::Active | SessionState::Warning) {
                    tracing::info!("auth token cleared by another runtime");
                    self.expire(LogoutReason::RemoteSignal).await;
                }
            }
            Some(token) => {
                // Adoption is a mid-session concern; a pre-login or already
                // expired runtime waits for its own session start.
                if !matches!(self.state(), SessionState::Active | SessionState::Warning) {
                    return;
                }
                let current = self.store.current();
                let changed = current
                    .map(|v| v.credential.as_str() != token)
                    .unwrap_or(true);
                if changed {
                    match self.store.install_external(Credential::new(token)) {
                        Ok(versioned) => {
                            tracing::debug!("adopted credential rotated by another runtime");
                            self.on_refresh_success();
                            self.scheduler.arm(&versioned.claims);
                        }
                        Err(_) => {
                            tracing::warn!("another runtime stored a malformed credential")
                        }
                    }
                }
            }
        }
    }

    /// Periodic / focus reconciliation against durable storage, which is
    /// always re-read immediately before use.
    async fn reconcile(&mut self) {
        if !matches!(self.state(), SessionState::Active | SessionState::Warning) {
            return;
        }
        match self.store.durable_token() {
            None => {
                // Cleared while we weren't looking (missed change event).
                self.expire(LogoutReason::RemoteSignal).await;
            }
            Some(token) => {
                let current = self.store.current();
                let changed = current
                    .as_ref()
                    .map(|v| v.credential.as_str() != token)
                    .unwrap_or(true);
                if changed {
                    if let Ok(versioned) = self.store.install_external(Credential::new(token)) {
                        self.on_refresh_success();
                        self.scheduler.arm(&versioned.claims);
                    }
                } else if let Some(versioned) = current {
                    if versioned.claims.is_expired(Utc::now()) {
                        self.expire(LogoutReason::Expired).await;
                    } else {
                        // Idempotent re-arm; cancel precedes arm inside.
                        self.scheduler.arm(&versioned.claims);
                    }
                }
            }
        }
    }

    fn on_refresh_success(&mut self) {
        if self.warning_shown_for.take().is_some() {
            self.alerts.dismiss_expiry_warning();
        }
        if matches!(self.state(), SessionState::Warning | SessionState::Expired) {
            // Expired is terminal per credential; a refresh success can only
            // arrive here for a *new* credential adopted from elsewhere.
            self.set_state(SessionState::Active);
        }
    }

    /// Surface the expiry warning toast at most once per credential version.
    fn surface_warning_once(&mut self) {
        if self.state() != SessionState::Warning {
            return;
        }
        let version = self.store.version();
        if self.warning_shown_for != Some(version) {
            self.warning_shown_for = Some(version);
            self.alerts.show_expiry_warning();
        }
    }

    /// The single logout sequence. Duplicate-suppressed: once Expired, every
    /// further trigger is a no-op until a new session starts.
    async fn expire(&mut self, reason: LogoutReason) {
        if self.state() == SessionState::Expired {
            return;
        }
        tracing::info!(?reason, "running logout sequence");
        self.set_state(SessionState::Expired);

        self.scheduler.cancel();
        self.store.clear(reason != LogoutReason::RemoteSignal);
        if let Some(channel) = &self.channel {
            channel.close();
        }
        if reason != LogoutReason::Manual {
            self.tab_store
                .set(&self.keys.return_url_key, &self.navigator.current_location());
            self.alerts.show_session_expired();
        }
        self.navigator.navigate_to_login();
        self.logout_guard.release();
        self.warning_shown_for = None;
    }
}
