//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::ReconnectPolicy;
use crate::errors::SettingsError;

/// Default daemon endpoint.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:9867/ws-rpc";
/// Default handshake timeout in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5000;
/// Default request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Default liveness timeout in milliseconds (three missed daemon pings).
pub const DEFAULT_LIVENESS_TIMEOUT_MS: u64 = 45_000;
/// Upper bound for every timeout (one hour).
pub const MAX_TIMEOUT_MS: u64 = 3_600_000;

fn default_url() -> String {
    DEFAULT_URL.to_string()
}
fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}
fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}
#[allow(clippy::unnecessary_wraps)]
fn default_liveness_timeout_ms() -> Option<u64> {
    Some(DEFAULT_LIVENESS_TIMEOUT_MS)
}

/// Connection parameters for a [`Client`](crate::Client).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Daemon endpoint; reconnects target the same URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Bound on transport open plus `connected` frame.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Bound on every command and query.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Silence after which the connection is treated as dropped. `null` disables.
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: Option<u64>,
    /// Send `subscribe`/`unsubscribe` frames as local interest changes.
    #[serde(default)]
    pub announce_subscriptions: bool,
    /// Reconnect policy after an unexpected drop.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            liveness_timeout_ms: default_liveness_timeout_ms(),
            announce_subscriptions: false,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at `url`.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Handshake timeout as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Liveness timeout as a [`Duration`], if enabled.
    pub fn liveness_timeout(&self) -> Option<Duration> {
        self.liveness_timeout_ms.map(Duration::from_millis)
    }

    /// Reject values the connection task cannot work with.
    ///
    /// Timeouts must lie in `1..=MAX_TIMEOUT_MS`; the timer wheel behind
    /// request deadlines cannot schedule arbitrarily far ahead.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.url.is_empty() {
            return Err(SettingsError::InvalidValue("url must not be empty".into()));
        }
        check_timeout("handshakeTimeoutMs", self.handshake_timeout_ms)?;
        check_timeout("requestTimeoutMs", self.request_timeout_ms)?;
        if let Some(ms) = self.liveness_timeout_ms {
            check_timeout("livenessTimeoutMs", ms)?;
        }
        Ok(())
    }
}

fn check_timeout(field: &str, ms: u64) -> Result<(), SettingsError> {
    if (1..=MAX_TIMEOUT_MS).contains(&ms) {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(format!(
            "{field} must be between 1 and {MAX_TIMEOUT_MS}, got {ms}"
        )))
    }
}
