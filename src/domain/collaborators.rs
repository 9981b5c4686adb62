//! Outbound collaborator ports.
//!
//! The lifecycle core consumes its surroundings through narrow traits: the
//! embedding application supplies the toast surface, navigation, and the
//! framework session object. The core owns de-duplication; the surfaces
//! just render.

use async_trait::async_trait;

use crate::domain::credential::Claims;
use crate::domain::notification::Notification;
use crate::shared::error::SessionError;

/// User-facing toast/alert surface.
///
/// The monitor guarantees at most one expiry warning and one logout notice
/// per incident; implementations need no de-duplication of their own.
pub trait AlertSurface: Send + Sync {
    /// Surface the near-expiry warning with a manual "refresh now" action
    /// (the embedder wires the action to `MonitorHandle::refresh_now`).
    fn show_expiry_warning(&self);

    /// Dismiss a previously shown warning after a successful refresh.
    fn dismiss_expiry_warning(&self);

    /// Surface the terminal "session expired" notice.
    fn show_session_expired(&self);
}

/// Navigation surface used for the logout redirect.
pub trait Navigator: Send + Sync {
    /// Current location, remembered as the post-re-login return URL.
    fn current_location(&self) -> String;

    /// Navigate to the login surface.
    fn navigate_to_login(&self);
}

/// Framework-level session object the core pushes rotated claims into.
pub trait SessionProvider: Send + Sync {
    fn current_session(&self) -> Option<Claims>;
    fn update(&self, claims: &Claims);
    fn clear(&self);
}

/// Point-in-time notification pull, used to heal the cache after the
/// realtime channel reconnects.
#[async_trait]
pub trait NotificationFetcher: Send + Sync {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SessionError>;
}
