//! # Sync Configuration
//!
//! Configuration for the calendar sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CARELOOP_WEBHOOK_BASE_URL=https://app.careloop.example             │
//! │     CARELOOP_SYNC_DEBOUNCE_MS=2000                                     │
//! │     CARELOOP_SYNC_RETRY_BASE_MS=30000                                  │
//! │     CARELOOP_SYNC_RETRY_MAX_MS=900000                                  │
//! │     CARELOOP_SYNC_POLL_INTERVAL_SECS=300                               │
//! │     CARELOOP_DEFAULT_TIME_ZONE=America/Chicago                         │
//! │     CARELOOP_SYNC_ENABLED=true                                         │
//! │     CARELOOP_SYNC_POLLING_FALLBACK=false                               │
//! │                                                                         │
//! │  2. Default Values (lowest priority)                                   │
//! │     2s debounce, 30s retry base, 15m retry cap, 5m poll                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Defaults
// =============================================================================

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_retry_base_ms() -> u64 {
    30_000
}

fn default_retry_max_ms() -> u64 {
    900_000 // 15 minutes
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_time_zone() -> String {
    "America/Chicago".to_string()
}

fn default_channel_ttl_secs() -> u64 {
    7 * 24 * 3600 // Google caps calendar watch channels at ~1 week
}

fn default_renewal_threshold_secs() -> u64 {
    24 * 3600
}

fn default_renewal_lookahead_secs() -> u64 {
    12 * 3600
}

fn default_token_refresh_skew_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Sync Configuration
// =============================================================================

/// Configuration consumed by the scheduler, runner, watch-channel
/// manager, and gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Public base URL webhook notifications are delivered to. The
    /// watch registration address is `<base>/webhooks/google-calendar`.
    pub webhook_base_url: String,

    /// Quiet period after the last trigger before a sync runs.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// First retry delay after a failed run.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Cap on the exponential retry delay.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Interval of the polling fallback / watch-renewal loop.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Timeout applied to every provider request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// IANA zone assumed when an inbound event carries neither a zone
    /// name nor an offset matching a known zone.
    #[serde(default = "default_time_zone")]
    pub default_time_zone: String,

    /// Requested lifetime of a watch channel.
    #[serde(default = "default_channel_ttl_secs")]
    pub channel_ttl_secs: u64,

    /// A channel with less than this much lifetime left is rotated by
    /// `ensure_watch` instead of reused.
    #[serde(default = "default_renewal_threshold_secs")]
    pub renewal_threshold_secs: u64,

    /// The poll loop renews channels expiring within this window.
    #[serde(default = "default_renewal_lookahead_secs")]
    pub renewal_lookahead_secs: u64,

    /// An access token within this many seconds of expiry is refreshed
    /// proactively.
    #[serde(default = "default_token_refresh_skew_secs")]
    pub token_refresh_skew_secs: u64,

    /// Master switch. Off in test environments so CRUD fixtures do not
    /// trigger network calls.
    #[serde(default = "default_true")]
    pub sync_enabled: bool,

    /// When set, the poll loop also schedules a sync for every user
    /// with a connected calendar (safety net for missed webhooks).
    #[serde(default)]
    pub polling_fallback: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            webhook_base_url: String::new(),
            debounce_ms: default_debounce_ms(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            default_time_zone: default_time_zone(),
            channel_ttl_secs: default_channel_ttl_secs(),
            renewal_threshold_secs: default_renewal_threshold_secs(),
            renewal_lookahead_secs: default_renewal_lookahead_secs(),
            token_refresh_skew_secs: default_token_refresh_skew_secs(),
            sync_enabled: true,
            polling_fallback: false,
        }
    }
}

impl SyncConfig {
    /// Builds a configuration from defaults plus `CARELOOP_*`
    /// environment overrides.
    pub fn from_env() -> SyncResult<Self> {
        let mut config = SyncConfig::default();

        if let Ok(url) = std::env::var("CARELOOP_WEBHOOK_BASE_URL") {
            config.webhook_base_url = url;
        }
        if let Some(v) = env_u64("CARELOOP_SYNC_DEBOUNCE_MS")? {
            config.debounce_ms = v;
        }
        if let Some(v) = env_u64("CARELOOP_SYNC_RETRY_BASE_MS")? {
            config.retry_base_ms = v;
        }
        if let Some(v) = env_u64("CARELOOP_SYNC_RETRY_MAX_MS")? {
            config.retry_max_ms = v;
        }
        if let Some(v) = env_u64("CARELOOP_SYNC_POLL_INTERVAL_SECS")? {
            config.poll_interval_secs = v;
        }
        if let Some(v) = env_u64("CARELOOP_SYNC_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = v;
        }
        if let Ok(zone) = std::env::var("CARELOOP_DEFAULT_TIME_ZONE") {
            config.default_time_zone = zone;
        }
        if let Some(v) = env_bool("CARELOOP_SYNC_ENABLED")? {
            config.sync_enabled = v;
        }
        if let Some(v) = env_bool("CARELOOP_SYNC_POLLING_FALLBACK")? {
            config.polling_fallback = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency. Called by `from_env` and by
    /// embedders that build the struct directly.
    pub fn validate(&self) -> SyncResult<()> {
        if self.retry_base_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "retry_base_ms must be positive".into(),
            ));
        }
        if self.retry_max_ms < self.retry_base_ms {
            return Err(SyncError::InvalidConfig(format!(
                "retry_max_ms ({}) must be >= retry_base_ms ({})",
                self.retry_max_ms, self.retry_base_ms
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be positive".into(),
            ));
        }
        self.default_zone()?;
        Ok(())
    }

    /// The parsed default zone.
    pub fn default_zone(&self) -> SyncResult<Tz> {
        self.default_time_zone.parse::<Tz>().map_err(|_| {
            SyncError::InvalidConfig(format!(
                "unknown default time zone: {}",
                self.default_time_zone
            ))
        })
    }

    /// Debounce window as a `Duration`.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Retry base delay as a `Duration`.
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    /// Retry delay cap as a `Duration`.
    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    /// Poll loop interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Per-request provider timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Full webhook delivery address registered with the provider.
    pub fn webhook_address(&self) -> String {
        format!(
            "{}/webhooks/google-calendar",
            self.webhook_base_url.trim_end_matches('/')
        )
    }
}

// =============================================================================
// Environment Helpers
// =============================================================================

fn env_u64(name: &str) -> SyncResult<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| SyncError::InvalidConfig(format!("{name} must be an integer: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn env_bool(name: &str) -> SyncResult<Option<bool>> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(SyncError::InvalidConfig(format!(
                "{name} must be a boolean: {other:?}"
            ))),
        },
        Err(_) => Ok(None),
    }
}
