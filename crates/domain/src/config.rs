//! Configuration structures
//!
//! Plain data carried from the loader into the components. Durations are
//! stored as integer seconds so the structs stay serde-friendly; accessor
//! methods convert to `std::time::Duration` at the call site.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
    /// Public base URL the calendar provider can reach, no trailing slash.
    pub host_url: String,
    /// First path segment of the push endpoint.
    pub push_prefix: String,
    /// Optional JSON file with registered user accounts.
    pub accounts_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            host_url: String::new(),
            push_prefix: "push".into(),
            accounts_path: None,
        }
    }
}

/// Per-client websocket session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between server pings.
    pub ping_interval_seconds: u64,
    /// Deadline applied to every socket write.
    pub write_wait_seconds: u64,
    /// How long to wait for any inbound frame before the read side times out.
    /// Pongs extend this window.
    pub pong_wait_seconds: u64,
    /// Outbound event queue bound; a full queue closes the session.
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval_seconds: 10,
            write_wait_seconds: 20,
            pong_wait_seconds: 45,
            queue_capacity: 32,
        }
    }
}

impl SessionConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_seconds)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_seconds)
    }
}

/// Managed push-channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Interval of the self-directed sync push that bounds staleness.
    pub safety_sync_interval_seconds: u64,
    /// Full-range fetches cover `[now, now + lookahead_days)`.
    pub lookahead_days: i64,
    /// Outer deadline applied to every provider call.
    pub provider_timeout_seconds: u64,
    /// Bound of the event output stream.
    pub stream_capacity: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            safety_sync_interval_seconds: 30 * 60,
            lookahead_days: 14,
            provider_timeout_seconds: 30,
            stream_capacity: 100,
        }
    }
}

impl SubscriptionConfig {
    pub fn safety_sync_interval(&self) -> Duration {
        Duration::from_secs(self.safety_sync_interval_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn lookahead(&self) -> chrono::Duration {
        chrono::Duration::days(self.lookahead_days)
    }
}

/// OAuth client settings, consumed by the external registration flow.
/// The core only carries them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: String::new(),
            scopes: vec!["https://www.googleapis.com/auth/calendar.readonly".to_string()],
        }
    }
}
