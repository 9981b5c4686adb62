//! Session Error Types
//!
//! Centralized error taxonomy for the credential lifecycle core.

use crate::domain::credential::DecodeError;

/// Session lifecycle error type for the cross-cutting surfaces (HTTP
/// client, realtime connection, storage adapters).
///
/// Refresh and channel-handshake failures carry their own local enums
/// (`RefreshFailure`, `ConnectError`) next to the code that matches on
/// them; this type covers everything that crosses a module boundary.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The credential could not be decoded. Treated as "no valid session",
    /// never fatal; it simply suppresses scheduling.
    #[error("malformed credential")]
    MalformedCredential,

    /// An API call failed authorization. Drives the single global logout.
    #[error("unauthorized response from {0}")]
    UnauthorizedResponse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DecodeError> for SessionError {
    fn from(_: DecodeError) -> Self {
        SessionError::MalformedCredential
    }
}
