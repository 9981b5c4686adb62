//! Authenticated HTTP client.
//!
//! Every outbound request is annotated with the credential resolved at send
//! time, never one cached at construction, since credentials rotate. On the
//! authoritative unauthorized response, only the first failure in a burst
//! escalates the logout; concurrent siblings observe the guard and
//! short-circuit. Explicitly public endpoints never trigger logout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::application::monitor::MonitorEvent;
use crate::infrastructure::storage::CredentialStore;
use crate::shared::error::SessionError;

/// Guarded single-assignment logout flag with a TTL fallback.
///
/// The monitor releases it deterministically once navigation settles; the
/// TTL only covers the case where the monitor never runs the sequence.
pub struct LogoutGuard {
    ttl: Duration,
    held_since: Mutex<Option<Instant>>,
}

impl LogoutGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            held_since: Mutex::new(None),
        }
    }

    /// Acquire the flag. Returns false while another holder is within the
    /// TTL; only the first acquirer in a burst gets true.
    pub fn try_acquire(&self) -> bool {
        let mut held = self.held_since.lock();
        match *held {
            Some(since) if since.elapsed() < self.ttl => false,
            _ => {
                *held = Some(Instant::now());
                true
            }
        }
    }

    pub fn release(&self) {
        *self.held_since.lock() = None;
    }

    pub fn is_held(&self) -> bool {
        matches!(*self.held_since.lock(), Some(since) if since.elapsed() < self.ttl)
    }
}

/// An outbound API request, transport-agnostic.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<serde_json::Value>,
}

/// A received API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The wire side of the HTTP client, behind a trait for dependency
/// injection. A transport error means the request never got an HTTP answer.
#[async_trait]
pub trait HttpExecute: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, SessionError>;
}

pub struct AuthHttpClient {
    executor: Arc<dyn HttpExecute>,
    store: Arc<CredentialStore>,
    guard: Arc<LogoutGuard>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    public_prefixes: Vec<String>,
}

impl AuthHttpClient {
    pub fn new(
        executor: Arc<dyn HttpExecute>,
        store: Arc<CredentialStore>,
        guard: Arc<LogoutGuard>,
        events: mpsc::UnboundedSender<MonitorEvent>,
        public_prefixes: Vec<String>,
    ) -> Self {
        Self {
            executor,
            store,
            guard,
            events,
            public_prefixes,
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, SessionError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, SessionError> {
        self.request(Method::POST, path, body).await
    }

    /// Execute a request with the current credential attached at send time.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, SessionError> {
        let bearer = self
            .store
            .resolve_credential()
            .map(|(credential, _)| credential.as_str().to_string());

        let response = self
            .executor
            .execute(ApiRequest {
                method,
                path: path.to_string(),
                bearer,
                body,
            })
            .await?;

        if response.status == 401 {
            return Err(self.on_unauthorized(path));
        }
        Ok(response)
    }

    fn on_unauthorized(&self, path: &str) -> SessionError {
        if self.is_public(path) {
            // May legitimately be unauthenticated; report, don't log out.
            tracing::debug!(%path, "unauthorized response on public endpoint");
        } else if self.guard.try_acquire() {
            tracing::warn!(%path, "unauthorized response, escalating logout");
            let _ = self.events.send(MonitorEvent::Unauthorized);
        } else {
            tracing::debug!(%path, "unauthorized response during logout burst, suppressed");
        }
        SessionError::UnauthorizedResponse(path.to_string())
    }

    fn is_public(&self, path: &str) -> bool {
        self.public_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}
