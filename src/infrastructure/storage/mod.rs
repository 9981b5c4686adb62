//! Storage Infrastructure
//!
//! Durable shared storage (the cross-runtime signal fabric), the
//! per-runtime credential store, and ephemeral per-runtime state.

mod credential_store;
mod shared_store;
mod tab_store;

pub use credential_store::{CredentialSource, CredentialStore};
pub use shared_store::{KeyChange, MemorySharedStore, RuntimeId, SharedStore};
pub use tab_store::TabStore;
