//! Settings types.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrpcSettings {
    /// Session lifecycle and liveness settings.
    pub session: SessionSettings,
    /// Messaging gateway connection settings.
    pub gateway: GatewaySettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Session lifecycle settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Pause between two heartbeat probes of one session, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// How long a single heartbeat call may take before the session is
    /// considered unresponsive, in milliseconds.
    pub heartbeat_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
        }
    }
}

/// Messaging gateway settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Broker address, `host:port`.
    pub url: String,
    /// Upper bound for an outgoing RPC call, in milliseconds.
    pub response_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: "localhost:6020".to_string(),
            response_timeout_ms: 10_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit one JSON object per line instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}
