//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all lifecycle settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Session lifecycle timing (thresholds, cool-downs, ticks)
    pub session: SessionSettings,

    /// Remote endpoint configuration
    pub endpoints: EndpointSettings,

    /// Durable/ephemeral storage key names
    pub storage: StorageSettings,

    /// Realtime channel configuration
    pub realtime: RealtimeSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Session lifecycle timing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// How long before expiry the pre-emptive refresh fires, in seconds
    pub warning_threshold_secs: u64,

    /// Minimum gap between refresh attempts after a failure, in seconds
    pub refresh_cooldown_secs: u64,

    /// Coarse periodic reconciliation interval, in seconds
    pub safety_tick_secs: u64,

    /// Fallback TTL for the single-logout guard, in seconds
    pub logout_guard_ttl_secs: u64,
}

impl SessionSettings {
    pub fn warning_threshold(&self) -> Duration {
        Duration::from_secs(self.warning_threshold_secs)
    }

    pub fn refresh_cooldown(&self) -> Duration {
        Duration::from_secs(self.refresh_cooldown_secs)
    }

    pub fn safety_tick(&self) -> Duration {
        Duration::from_secs(self.safety_tick_secs)
    }

    pub fn logout_guard_ttl(&self) -> Duration {
        Duration::from_secs(self.logout_guard_ttl_secs)
    }
}

/// Remote endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSettings {
    /// Base URL of the API server (e.g. "https://api.example.com")
    pub base_url: String,

    /// Refresh endpoint path, POSTed with the current bearer header
    pub refresh_path: String,

    /// Point-in-time notification pull path
    pub notifications_path: String,

    /// Realtime transport endpoint (ws:// or wss://)
    pub realtime_url: String,

    /// Path prefixes that may legitimately be unauthenticated; failures on
    /// these never trigger logout
    pub public_prefixes: Vec<String>,
}

/// Storage key configuration.
///
/// `auth_token` and `current_user` live in durable shared storage; a removal
/// of the auth token key is the cross-tab logout signal. `return_url` is
/// ephemeral per-runtime state.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub auth_token_key: String,
    pub current_user_key: String,
    pub return_url_key: String,
}

/// Realtime channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeSettings {
    /// Initial reconnect backoff, in milliseconds
    pub backoff_base_ms: u64,

    /// Reconnect backoff ceiling, in milliseconds
    pub backoff_cap_ms: u64,

    /// Prefer an in-place auth frame over close/reopen on credential
    /// rotation, when the transport supports it
    pub in_place_reauth: bool,
}

impl RealtimeSettings {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("session.warning_threshold_secs", 300_i64)?
            .set_default("session.refresh_cooldown_secs", 10_i64)?
            .set_default("session.safety_tick_secs", 60_i64)?
            .set_default("session.logout_guard_ttl_secs", 10_i64)?
            .set_default("endpoints.base_url", "http://localhost:3000")?
            .set_default("endpoints.refresh_path", "/auth/refresh-token")?
            .set_default("endpoints.notifications_path", "/notifications")?
            .set_default("endpoints.realtime_url", "ws://localhost:3000/realtime")?
            .set_default("endpoints.public_prefixes", vec!["/auth", "/public"])?
            .set_default("storage.auth_token_key", "authToken")?
            .set_default("storage.current_user_key", "currentUser")?
            .set_default("storage.return_url_key", "returnUrl")?
            .set_default("realtime.backoff_base_ms", 1000_i64)?
            .set_default("realtime.backoff_cap_ms", 30000_i64)?
            .set_default("realtime.in_place_reauth", true)?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__SESSION__WARNING_THRESHOLD_SECS=300 -> session.warning_threshold_secs
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("endpoints.base_url", std::env::var("API_BASE_URL").ok())?
            .set_override_option("endpoints.realtime_url", std::env::var("REALTIME_URL").ok())?
            .build()?
            .try_deserialize()
    }
}
