//! # Configuration Module
//!
//! This module handles configuration loading and management.
//! Configuration can be loaded from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{environment}.toml)
//! - .env files (via dotenvy)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_core::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Refresh endpoint: {}", settings.endpoints.refresh_path);
//! ```

mod settings;

pub use settings::*;
