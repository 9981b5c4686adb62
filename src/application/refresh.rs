//! Refresh coordination.
//!
//! Single source of truth for "is a refresh in flight". Concurrent callers
//! are coalesced onto one network call; a failure is cached for a cool-down
//! window so timers and focus events firing close together cannot stampede
//! the endpoint. The credential store is always updated *before* any waiter
//! is resolved.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::domain::credential::{Credential, VersionedCredential};
use crate::infrastructure::storage::CredentialStore;

/// Why a refresh attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// Could not reach the server; transient, retried by the next trigger.
    Network(String),
    /// The server rejected the refresh itself; unrecoverable.
    Rejected(String),
}

/// Outcome of a refresh attempt, shared by all coalesced callers.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Refreshed(VersionedCredential),
    Failed(RefreshFailure),
}

/// The network side of a refresh, behind a trait for dependency injection.
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    /// Exchange the current credential for a new one.
    async fn refresh(&self, current: &Credential) -> Result<Credential, RefreshFailure>;
}

/// Introspection snapshot of the coordinator state.
#[derive(Debug, Clone)]
pub struct RefreshState {
    pub in_flight: bool,
    pub last_attempt_at: Option<Instant>,
    pub last_result: Option<RefreshOutcome>,
}

struct CoordinatorState {
    in_flight: Option<broadcast::Sender<RefreshOutcome>>,
    last_attempt_at: Option<Instant>,
    last_result: Option<RefreshOutcome>,
}

enum Entry {
    Leader(broadcast::Sender<RefreshOutcome>),
    Waiter(broadcast::Receiver<RefreshOutcome>),
    CachedFailure(RefreshOutcome),
}

pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    transport: Arc<dyn RefreshTransport>,
    cool_down: Duration,
    state: Mutex<CoordinatorState>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        transport: Arc<dyn RefreshTransport>,
        cool_down: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            cool_down,
            state: Mutex::new(CoordinatorState {
                in_flight: None,
                last_attempt_at: None,
                last_result: None,
            }),
        }
    }

    /// Request a refresh, coalescing with any attempt already in flight.
    ///
    /// At most one network call is outstanding at any time; every caller
    /// receives the same outcome. A failed attempt within the cool-down is
    /// returned from cache without touching the network. Logout on failure
    /// is the monitor's job, not this one's.
    pub async fn request_refresh(&self) -> RefreshOutcome {
        let entry = {
            let mut state = self.state.lock();
            if let Some(tx) = &state.in_flight {
                Entry::Waiter(tx.subscribe())
            } else if let Some(cached) = self.cached_failure(&state) {
                Entry::CachedFailure(cached)
            } else {
                let (tx, _) = broadcast::channel(1);
                state.in_flight = Some(tx.clone());
                state.last_attempt_at = Some(Instant::now());
                Entry::Leader(tx)
            }
        };

        match entry {
            Entry::CachedFailure(outcome) => {
                tracing::debug!("refresh inside cool-down, returning cached failure");
                outcome
            }
            Entry::Waiter(mut rx) => rx.recv().await.unwrap_or_else(|_| {
                RefreshOutcome::Failed(RefreshFailure::Network("refresh aborted".into()))
            }),
            Entry::Leader(tx) => {
                let outcome = self.perform().await;
                {
                    let mut state = self.state.lock();
                    state.in_flight = None;
                    state.last_result = Some(outcome.clone());
                }
                // Waiters resolve only after the store write in perform().
                let _ = tx.send(outcome.clone());
                outcome
            }
        }
    }

    /// Coordinator state snapshot.
    pub fn state(&self) -> RefreshState {
        let state = self.state.lock();
        RefreshState {
            in_flight: state.in_flight.is_some(),
            last_attempt_at: state.last_attempt_at,
            last_result: state.last_result.clone(),
        }
    }

    fn cached_failure(&self, state: &CoordinatorState) -> Option<RefreshOutcome> {
        let last_attempt = state.last_attempt_at?;
        match &state.last_result {
            Some(outcome @ RefreshOutcome::Failed(_))
                if last_attempt.elapsed() < self.cool_down =>
            {
                Some(outcome.clone())
            }
            _ => None,
        }
    }

    async fn perform(&self) -> RefreshOutcome {
        let Some((current, source)) = self.store.resolve_credential() else {
            tracing::warn!("refresh requested with no credential anywhere");
            return RefreshOutcome::Failed(RefreshFailure::Rejected(
                "no credential to refresh".into(),
            ));
        };
        tracing::debug!(?source, "issuing refresh call");

        match self.transport.refresh(&current).await {
            Ok(new_credential) => match self.store.install(new_credential) {
                Ok(versioned) => {
                    tracing::info!(version = versioned.version, "credential refreshed");
                    RefreshOutcome::Refreshed(versioned)
                }
                Err(_) => RefreshOutcome::Failed(RefreshFailure::Rejected(
                    "refresh returned a malformed credential".into(),
                )),
            },
            Err(failure) => {
                tracing::warn!(?failure, "refresh attempt failed");
                RefreshOutcome::Failed(failure)
            }
        }
    }
}
