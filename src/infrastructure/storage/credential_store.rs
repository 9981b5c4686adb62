//! Per-runtime credential store.
//!
//! Owns the one "current" credential of this runtime and its version
//! counter. Consumers (HTTP client, realtime channel, scheduler) read the
//! current value and react to rotation through a watch channel. Writes fan
//! out to durable shared storage and the framework session object; policy
//! (when to refresh, when to log out) lives elsewhere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::StorageSettings;
use crate::domain::collaborators::SessionProvider;
use crate::domain::credential::{decode_claims, Credential, VersionedCredential};
use crate::shared::error::SessionError;

use super::shared_store::{RuntimeId, SharedStore};

/// Where a resolved credential came from, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// The in-memory current value of this runtime.
    SessionMemory,
    /// A fresh read of durable shared storage.
    DurableStorage,
}

pub struct CredentialStore {
    runtime_id: RuntimeId,
    shared: Arc<dyn SharedStore>,
    session: Option<Arc<dyn SessionProvider>>,
    keys: StorageSettings,
    current: watch::Sender<Option<VersionedCredential>>,
    version: AtomicU64,
}

impl CredentialStore {
    pub fn new(
        runtime_id: RuntimeId,
        shared: Arc<dyn SharedStore>,
        session: Option<Arc<dyn SessionProvider>>,
        keys: StorageSettings,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            runtime_id,
            shared,
            session,
            keys,
            current,
            version: AtomicU64::new(0),
        }
    }

    /// Install a credential as the new current value.
    ///
    /// Decodes the claims, bumps the version, writes through to durable
    /// storage and the session provider, then publishes to watchers. The
    /// durable write precedes the publish so a watcher reacting to rotation
    /// reads storage consistently.
    pub fn install(&self, credential: Credential) -> Result<VersionedCredential, SessionError> {
        let versioned = self.adopt(credential)?;
        self.shared.set(
            self.runtime_id,
            &self.keys.auth_token_key,
            versioned.credential.as_str(),
        );
        // Publish after the durable write.
        self.current.send_replace(Some(versioned.clone()));
        tracing::debug!(version = versioned.version, "credential installed");
        Ok(versioned)
    }

    /// Install a credential that already lives in durable storage (written
    /// by another runtime); everything install does except the durable
    /// write-back.
    pub fn install_external(
        &self,
        credential: Credential,
    ) -> Result<VersionedCredential, SessionError> {
        let versioned = self.adopt(credential)?;
        self.current.send_replace(Some(versioned.clone()));
        tracing::debug!(version = versioned.version, "external credential adopted");
        Ok(versioned)
    }

    fn adopt(&self, credential: Credential) -> Result<VersionedCredential, SessionError> {
        let claims = decode_claims(&credential)?;
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(session) = &self.session {
            session.update(&claims);
        }
        Ok(VersionedCredential {
            credential,
            claims,
            version,
        })
    }

    /// Drop the current credential. When `propagate` is set the durable
    /// keys are removed too, which is the cross-tab logout signal; a logout
    /// that *originated* in another runtime must not propagate again.
    pub fn clear(&self, propagate: bool) {
        self.current.send_replace(None);
        if let Some(session) = &self.session {
            session.clear();
        }
        if propagate {
            self.shared.remove(self.runtime_id, &self.keys.auth_token_key);
            self.shared.remove(self.runtime_id, &self.keys.current_user_key);
        }
    }

    pub fn current(&self) -> Option<VersionedCredential> {
        self.current.borrow().clone()
    }

    /// Rotation events for the HTTP client and the realtime channel.
    pub fn subscribe(&self) -> watch::Receiver<Option<VersionedCredential>> {
        self.current.subscribe()
    }

    /// Version of the current credential; 0 before any install.
    pub fn version(&self) -> u64 {
        self.current.borrow().as_ref().map(|v| v.version).unwrap_or(0)
    }

    /// Resolve the credential to attach to an outbound request, trying an
    /// explicit ordered list of sources. Durable storage is re-read at call
    /// time, never from a cached copy, since another runtime may have
    /// rotated it.
    pub fn resolve_credential(&self) -> Option<(Credential, CredentialSource)> {
        if let Some(versioned) = self.current() {
            return Some((versioned.credential, CredentialSource::SessionMemory));
        }
        if let Some(token) = self.shared.get(&self.keys.auth_token_key) {
            return Some((Credential::new(token), CredentialSource::DurableStorage));
        }
        None
    }

    /// Fresh durable-storage read of the auth token key.
    pub fn durable_token(&self) -> Option<String> {
        self.shared.get(&self.keys.auth_token_key)
    }

    /// Cache the user profile blob alongside the token. Removed together
    /// with the token on a propagated clear.
    pub fn cache_user_profile(&self, profile: &str) {
        self.shared
            .set(self.runtime_id, &self.keys.current_user_key, profile);
    }

    pub fn cached_user_profile(&self) -> Option<String> {
        self.shared.get(&self.keys.current_user_key)
    }

    pub fn runtime_id(&self) -> RuntimeId {
        self.runtime_id
    }
}
