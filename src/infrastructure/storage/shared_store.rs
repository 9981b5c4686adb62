//! Durable shared storage with change notifications.
//!
//! This is the only resource shared across runtimes ("tabs") of one
//! principal, and doubles as the cross-tab broadcast capability: every write
//! fans out a `KeyChange` to all subscribers. Removal of the auth token key
//! is the cross-tab logout signal.

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Identifies one runtime instance ("tab") as the writer of a change, so
/// subscribers can ignore their own writes.
pub type RuntimeId = Uuid;

/// A single key change, broadcast to every subscriber.
#[derive(Debug, Clone)]
pub struct KeyChange {
    pub key: String,
    /// None means the key was removed.
    pub new_value: Option<String>,
    pub writer: RuntimeId,
}

/// Durable per-principal key/value storage shared by all runtimes.
///
/// The credential key is append/overwrite-only and must never be
/// read-modified-written without re-reading immediately before use; another
/// runtime may have changed it in between.
pub trait SharedStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, writer: RuntimeId, key: &str, value: &str);
    fn remove(&self, writer: RuntimeId, key: &str);
    fn subscribe(&self) -> broadcast::Receiver<KeyChange>;
}

/// In-process `SharedStore` backed by a concurrent map and a broadcast
/// channel. Serves both production embedders that host several runtimes in
/// one process and the multi-runtime integration tests.
pub struct MemorySharedStore {
    entries: DashMap<String, String>,
    changes: broadcast::Sender<KeyChange>,
}

impl MemorySharedStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: DashMap::new(),
            changes,
        }
    }
}

impl Default for MemorySharedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStore for MemorySharedStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.clone())
    }

    fn set(&self, writer: RuntimeId, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
        let _ = self.changes.send(KeyChange {
            key: key.to_string(),
            new_value: Some(value.to_string()),
            writer,
        });
    }

    fn remove(&self, writer: RuntimeId, key: &str) {
        self.entries.remove(key);
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
