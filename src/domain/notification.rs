//! Notification read model.
//!
//! The cache is the single read model for pushed notification events. Push
//! delivery order is never assumed to be total: records are keyed by id,
//! applied as upserts, and an event older than the cached record for the
//! same id is discarded as stale. The unread count is always recomputed from
//! the records, never stored where it could drift.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single notification record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    /// Notification category as sent by the server
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of applying a pushed event to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    /// The event's timestamp was older than the cached record's; discarded.
    Stale,
}

/// Ordered, id-keyed collection of notification records.
#[derive(Debug, Default)]
pub struct NotificationCache {
    records: RwLock<HashMap<String, Notification>>,
}

impl NotificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a pushed event by id.
    ///
    /// An event for an id already present updates in place rather than
    /// duplicating; an event older than the newest-known timestamp for that
    /// id is discarded.
    pub fn apply(&self, event: Notification) -> Applied {
        let mut records = self.records.write();
        match records.get(&event.id) {
            Some(existing) if existing.created_at > event.created_at => {
                tracing::debug!(id = %event.id, "discarding stale notification event");
                Applied::Stale
            }
            Some(_) => {
                records.insert(event.id.clone(), event);
                Applied::Updated
            }
            None => {
                records.insert(event.id.clone(), event);
                Applied::Inserted
            }
        }
    }

    /// Merge a point-in-time pull into the cache, healing events missed
    /// while the channel was down. Each record goes through the same
    /// upsert/stale rules as pushed events.
    pub fn reconcile(&self, records: Vec<Notification>) {
        for record in records {
            self.apply(record);
        }
    }

    /// Mark a record read. Returns false when the id is unknown.
    pub fn mark_read(&self, id: &str) -> bool {
        let mut records = self.records.write();
        match records.get_mut(id) {
            Some(record) => {
                record.read = true;
                true
            }
            None => false,
        }
    }

    /// Unread count, recomputed from the records.
    pub fn unread_count(&self) -> usize {
        self.records.read().values().filter(|n| !n.read).count()
    }

    /// Snapshot of all records, newest first (id breaks ties).
    pub fn snapshot(&self) -> Vec<Notification> {
        let mut records: Vec<Notification> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        records
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
