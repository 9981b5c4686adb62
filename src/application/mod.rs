//! # Application Layer
//!
//! Lifecycle policy: refresh coordination, expiry scheduling, and the
//! session monitor state machine. Mechanism (storage, transports) lives in
//! the infrastructure layer; these services only orchestrate it.

pub mod monitor;
pub mod refresh;
pub mod scheduler;

pub use monitor::{MonitorEvent, MonitorHandle, SessionMonitor, SessionState};
pub use refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome, RefreshTransport};
pub use scheduler::ExpiryScheduler;
