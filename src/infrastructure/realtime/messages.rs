//! Realtime wire messages.

use serde::{Deserialize, Serialize};

use crate::domain::notification::Notification;

/// Events pushed by the server over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A notification record; reconciled into the cache by id.
    Notification(Notification),
    /// Server-side unread counter. Advisory only: the cache recomputes its
    /// own count and never stores this one.
    UnreadCount { count: u64 },
}

/// Messages sent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// In-place re-authentication after a credential rotation.
    Auth { token: String },
    /// Acknowledge delivery of an inbound notification.
    Ack { id: String },
}
