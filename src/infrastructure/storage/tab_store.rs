//! Ephemeral per-runtime storage.
//!
//! Holds state that must not outlive this runtime or leak to others, such
//! as the return URL remembered across a forced re-login.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct TabStore {
    entries: RwLock<HashMap<String, String>>,
}

impl TabStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.entries.write().insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries.write().remove(key)
    }
}
