//! HTTP Infrastructure
//!
//! The authenticated client (credential attached at send time, single
//! logout per unauthorized burst) and the reqwest-backed transports.

mod client;
mod transports;

pub use client::{ApiRequest, ApiResponse, AuthHttpClient, HttpExecute, LogoutGuard};
pub use transports::{HttpNotificationFetcher, HttpRefreshTransport, ReqwestExecutor};
