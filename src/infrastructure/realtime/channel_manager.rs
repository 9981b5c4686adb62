//! Realtime channel management.
//!
//! Keeps one push connection authenticated with the *current* credential.
//! On rotation the channel re-authenticates in place when the transport
//! supports it, otherwise closes and reopens; either way inbound events
//! already reconciled into the cache are never redelivered (the cache
//! upserts by id). Disconnects reconnect with capped exponential backoff,
//! and every (re)open heals the cache with a point-in-time pull. The
//! channel degrades independently of the session: losing notifications
//! never forces a logout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use crate::application::refresh::{RefreshCoordinator, RefreshOutcome};
use crate::config::RealtimeSettings;
use crate::domain::collaborators::NotificationFetcher;
use crate::domain::notification::{Applied, NotificationCache};
use crate::infrastructure::storage::CredentialStore;

use super::messages::{ClientMessage, ServerEvent};
use super::transport::{ConnectError, RealtimeConnection, RealtimeTransport};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Capped exponential backoff with jitter, reset on a successful open.
struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: base,
        }
    }

    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        // +/- 12.5% jitter keeps reconnect storms from synchronizing.
        let factor = rand::rng().random_range(0.875..=1.125);
        delay.mul_f64(factor)
    }

    fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Handle to a spawned channel task.
#[derive(Clone)]
pub struct ChannelHandle {
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<ConnectionState>,
    degraded: Arc<AtomicBool>,
}

impl ChannelHandle {
    /// Ask the channel task to close the transport and stop.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// True after the channel gave up on authentication; notifications are
    /// offline but the session itself is untouched.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

pub struct RealtimeChannelManager {
    transport: Arc<dyn RealtimeTransport>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    cache: Arc<NotificationCache>,
    fetcher: Arc<dyn NotificationFetcher>,
    settings: RealtimeSettings,
}

impl RealtimeChannelManager {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        store: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
        cache: Arc<NotificationCache>,
        fetcher: Arc<dyn NotificationFetcher>,
        settings: RealtimeSettings,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
            cache,
            fetcher,
            settings,
        }
    }

    /// Spawn the channel task and return its handle.
    pub fn spawn(self) -> ChannelHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let degraded = Arc::new(AtomicBool::new(false));

        let handle = ChannelHandle {
            shutdown: Arc::new(shutdown_tx),
            state: state_rx,
            degraded: degraded.clone(),
        };
        tokio::spawn(self.run(shutdown_rx, state_tx, degraded));
        handle
    }

    async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
        state: watch::Sender<ConnectionState>,
        degraded: Arc<AtomicBool>,
    ) {
        let mut cred_rx = self.store.subscribe();
        let mut backoff = Backoff::new(self.settings.backoff_base(), self.settings.backoff_cap());
        let mut pending_acks: Vec<String> = Vec::new();
        let mut ever_connected = false;

        'outer: loop {
            if *shutdown.borrow() {
                break;
            }

            // Wait for a credential to authenticate with.
            let Some(current) = self.store.current() else {
                let _ = state.send(ConnectionState::Closed);
                tokio::select! {
                    changed = cred_rx.changed() => {
                        if changed.is_err() { break 'outer; }
                        continue 'outer;
                    }
                    _ = shutdown.changed() => continue 'outer,
                }
            };

            let _ = state.send(if ever_connected {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            });

            let mut conn = match self.transport.connect(current.credential.as_str()).await {
                Ok(conn) => conn,
                Err(ConnectError::AuthRejected(reason)) => {
                    // One refresh attempt before degrading; never a logout.
                    tracing::warn!(%reason, "realtime handshake rejected, attempting refresh");
                    match self.coordinator.request_refresh().await {
                        RefreshOutcome::Refreshed(_) => continue 'outer,
                        RefreshOutcome::Failed(_) => {
                            tracing::warn!("realtime channel degraded to offline notifications");
                            degraded.store(true, Ordering::SeqCst);
                            let _ = state.send(ConnectionState::Closed);
                            tokio::select! {
                                changed = cred_rx.changed() => {
                                    if changed.is_err() { break 'outer; }
                                    continue 'outer;
                                }
                                _ = shutdown.changed() => continue 'outer,
                            }
                        }
                    }
                }
                Err(ConnectError::Transport(reason)) => {
                    let delay = backoff.next();
                    tracing::debug!(%reason, delay_ms = delay.as_millis() as u64, "realtime connect failed, backing off");
                    let _ = state.send(ConnectionState::Reconnecting);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue 'outer;
                }
            };

            backoff.reset();
            degraded.store(false, Ordering::SeqCst);
            ever_connected = true;
            let mut authenticated_version = current.version;
            let _ = state.send(ConnectionState::Open);
            tracing::info!(version = authenticated_version, "realtime channel open");

            // While offline the cache was the sole source of truth; heal
            // whatever the push stream missed.
            match self.fetcher.fetch_notifications().await {
                Ok(records) => self.cache.reconcile(records),
                Err(e) => tracing::warn!(error = %e, "notification heal pull failed"),
            }

            // Replay acknowledgements queued across the reconnect.
            for id in std::mem::take(&mut pending_acks) {
                if conn.send(ClientMessage::Ack { id: id.clone() }).await.is_err() {
                    pending_acks.push(id);
                }
            }

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        conn.close().await;
                        let _ = state.send(ConnectionState::Closed);
                        break 'outer;
                    }
                    changed = cred_rx.changed() => {
                        if changed.is_err() {
                            conn.close().await;
                            break 'outer;
                        }
                        match self.store.current() {
                            None => {
                                // Logged out; drop the transport and wait.
                                conn.close().await;
                                continue 'outer;
                            }
                            Some(rotated) if rotated.version != authenticated_version => {
                                if self.settings.in_place_reauth && conn.supports_reauth() {
                                    match conn
                                        .send(ClientMessage::Auth {
                                            token: rotated.credential.as_str().to_string(),
                                        })
                                        .await
                                    {
                                        Ok(()) => {
                                            authenticated_version = rotated.version;
                                            tracing::debug!(
                                                version = authenticated_version,
                                                "realtime channel re-authenticated in place"
                                            );
                                        }
                                        Err(_) => {
                                            conn.close().await;
                                            continue 'outer;
                                        }
                                    }
                                } else {
                                    conn.close().await;
                                    continue 'outer;
                                }
                            }
                            Some(_) => {}
                        }
                    }
                    event = conn.recv() => {
                        match event {
                            Some(Ok(ServerEvent::Notification(notification))) => {
                                let id = notification.id.clone();
                                if self.cache.apply(notification) != Applied::Stale
                                    && conn.send(ClientMessage::Ack { id: id.clone() }).await.is_err()
                                {
                                    pending_acks.push(id);
                                    let _ = state.send(ConnectionState::Reconnecting);
                                    continue 'outer;
                                }
                            }
                            Some(Ok(ServerEvent::UnreadCount { count })) => {
                                let local = self.cache.unread_count() as u64;
                                if local != count {
                                    tracing::debug!(server = count, local, "server unread count disagrees with cache");
                                }
                            }
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "realtime connection broke");
                                let _ = state.send(ConnectionState::Reconnecting);
                                continue 'outer;
                            }
                            None => {
                                tracing::debug!("realtime connection closed by peer");
                                let _ = state.send(ConnectionState::Reconnecting);
                                continue 'outer;
                            }
                        }
                    }
                }
            }
        }

        let _ = state.send(ConnectionState::Closed);
        tracing::debug!("realtime channel task stopped");
    }
}
