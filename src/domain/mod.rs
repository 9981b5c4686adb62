//! # Domain Layer
//!
//! Core types of the credential lifecycle: the credential itself, its
//! decoded claims, the notification read model, and the traits the
//! embedding application implements.
//!
//! ## Design Principles
//!
//! - No dependencies on infrastructure concerns
//! - Decoding is a pure function; a credential is immutable once decoded
//! - Collaborator traits define the outbound contracts

pub mod collaborators;
pub mod credential;
pub mod notification;

// Re-export commonly used types
pub use collaborators::*;
pub use credential::*;
pub use notification::*;
