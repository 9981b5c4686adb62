//! Expiry scheduling.
//!
//! Arms exactly one timer per credential version to trigger a pre-emptive
//! refresh before expiry. Scheduling is a pure transition from claims to a
//! timer: the same `arm` runs on activation, on refresh success (recursive
//! re-arm against the new claims, never a fixed-interval poll), on focus,
//! and on the safety tick. A timer armed for a superseded credential
//! version is a no-op if it fires.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::application::monitor::MonitorEvent;
use crate::application::refresh::{RefreshCoordinator, RefreshOutcome};
use crate::domain::credential::Claims;
use crate::infrastructure::storage::CredentialStore;

struct ScheduledRefresh {
    for_version: u64,
    fire_at: Instant,
    handle: JoinHandle<()>,
}

pub struct ExpiryScheduler {
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    warning_threshold: Duration,
    events: mpsc::UnboundedSender<MonitorEvent>,
    timer: Mutex<Option<ScheduledRefresh>>,
}

impl ExpiryScheduler {
    pub fn new(
        store: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
        warning_threshold: Duration,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Self {
        Self {
            store,
            coordinator,
            warning_threshold,
            events,
            timer: Mutex::new(None),
        }
    }

    /// Arm the single refresh timer for the given claims.
    ///
    /// Cancels any previous timer first (single-timer invariant). Claims
    /// already inside the warning threshold refresh immediately; claims
    /// already expired arm nothing and report expiry to the monitor.
    pub fn arm(self: &Arc<Self>, claims: &Claims) {
        self.cancel();

        let ttl = claims.time_until_expiry(Utc::now());
        if ttl <= chrono::Duration::zero() {
            tracing::info!(exp = claims.exp, "credential already expired, not scheduling");
            let _ = self.events.send(MonitorEvent::CredentialExpired);
            return;
        }

        let threshold =
            chrono::Duration::from_std(self.warning_threshold).unwrap_or_else(|_| ttl);
        let delay = if ttl > threshold {
            (ttl - threshold).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };

        let version = self.store.version();
        let fire_at = Instant::now() + delay;
        let this = Arc::clone(self);

        // The entry must be visible before the task can run: a zero-delay
        // timer on a multi-thread runtime can reach `fire` before `spawn`
        // returns, and `fire` claims its entry under this same lock.
        let mut timer = self.timer.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            this.fire(version).await;
        });

        tracing::debug!(version, delay_secs = delay.as_secs(), "refresh timer armed");
        *timer = Some(ScheduledRefresh {
            for_version: version,
            fire_at,
            handle,
        });
    }

    /// Cancel the live timer, if any. Idempotent; always called before
    /// re-arming and on teardown so no orphaned timer fires against a stale
    /// credential version.
    pub fn cancel(&self) {
        if let Some(scheduled) = self.timer.lock().take() {
            scheduled.handle.abort();
        }
    }

    pub fn has_live_timer(&self) -> bool {
        self.timer.lock().is_some()
    }

    async fn fire(self: Arc<Self>, armed_version: u64) {
        // Claim our own timer entry; anything else means we were superseded
        // between sleeping and firing.
        {
            let mut timer = self.timer.lock();
            match timer.as_ref() {
                Some(scheduled) if scheduled.for_version == armed_version => {
                    timer.take();
                }
                _ => return,
            }
        }
        if self.store.version() != armed_version {
            tracing::debug!(armed_version, "timer fired for superseded credential, no-op");
            return;
        }

        let _ = self.events.send(MonitorEvent::WarningThresholdCrossed);
        match self.coordinator.request_refresh().await {
            RefreshOutcome::Refreshed(versioned) => {
                let _ = self.events.send(MonitorEvent::RefreshSucceeded);
                self.arm(&versioned.claims);
            }
            RefreshOutcome::Failed(failure) => {
                let _ = self.events.send(MonitorEvent::RefreshFailed(failure));
            }
        }
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        if let Some(scheduled) = self.timer.lock().take() {
            scheduled.handle.abort();
        }
    }
}
