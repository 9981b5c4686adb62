//! # Session Core Library
//!
//! Client-resident session/credential lifecycle manager. Without any user
//! action it detects an expiring credential, refreshes it exactly once even
//! when concurrent timers and listeners fire together, propagates the
//! rotated credential to every consumer (HTTP client, realtime channel,
//! in-memory session), and forces a clean, single logout when refresh is
//! impossible, across multiple runtimes sharing durable storage with no
//! central coordinator.
//!
//! ## Module Structure
//!
//! ```text
//! session_core/
//! +-- config/         Configuration management
//! +-- domain/         Credential, claims, notification cache, collaborator traits
//! +-- application/    Refresh coordinator, expiry scheduler, session monitor
//! +-- infrastructure/ Storage, HTTP client, realtime channel
//! +-- shared/         Common utilities (errors)
//! +-- startup/        Runtime wiring
//! ```

// Configuration module
pub mod config;

// Domain layer - credential and notification types, collaborator traits
pub mod domain;

// Application layer - lifecycle policy
pub mod application;

// Infrastructure layer - storage and transports
pub mod infrastructure;

// Shared utilities
pub mod shared;

// Runtime wiring
pub mod startup;

// Telemetry and observability
pub mod telemetry;
