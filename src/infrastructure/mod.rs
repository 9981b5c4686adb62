//! # Infrastructure Layer
//!
//! Mechanism behind the lifecycle policy: storage (durable shared,
//! per-runtime credential, ephemeral), the authenticated HTTP client, and
//! the realtime channel.

pub mod http;
pub mod realtime;
pub mod storage;
