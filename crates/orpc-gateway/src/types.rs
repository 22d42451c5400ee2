//! Request, outcome and connection-state types.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Error code constants ────────────────────────────────────────────

/// No provider accepted the call (none registered, or every provider rejected).
pub const NO_RPC_PROVIDER: &str = "NO_RPC_PROVIDER";
/// The provider did not answer within the response timeout.
pub const RESPONSE_TIMEOUT: &str = "RESPONSE_TIMEOUT";
/// The calling connection is not open.
pub const CONNECTION_CLOSED: &str = "CONNECTION_CLOSED";

/// State of the connection between this process and the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Logged in and able to provide and make RPCs.
    Open,
    /// Closed deliberately or never opened.
    Closed,
    /// The connection failed.
    Error,
    /// Lost and currently trying to come back.
    Reconnecting,
}

impl ConnectionState {
    /// Whether RPCs can currently flow.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Error => "ERROR",
            Self::Reconnecting => "RECONNECTING",
        };
        f.write_str(s)
    }
}

/// First phase of the two-phase response: tells the caller that a provider
/// has taken the request.
///
/// Cloneable so a direct handler can hand it to whatever ends up doing the
/// work. Acknowledging twice is harmless.
#[derive(Clone, Debug, Default)]
pub struct Acknowledger {
    acked: Arc<AtomicBool>,
}

impl Acknowledger {
    /// A fresh, unacknowledged handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge receipt of the request.
    pub fn ack(&self) {
        self.acked.store(true, Ordering::Release);
    }

    /// Whether [`ack`](Self::ack) has been called.
    pub fn is_acknowledged(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }
}

/// An incoming RPC request as seen by a provider.
#[derive(Clone, Debug)]
pub struct RpcRequest {
    /// Address the request was made against.
    pub name: String,
    /// Raw payload.
    pub data: Value,
    ack: Acknowledger,
}

impl RpcRequest {
    /// Build a request with a fresh acknowledger.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self::with_acknowledger(name, data, Acknowledger::new())
    }

    /// Build a request around an existing acknowledger so the caller can
    /// observe the ack.
    pub fn with_acknowledger(name: impl Into<String>, data: Value, ack: Acknowledger) -> Self {
        Self {
            name: name.into(),
            data,
            ack,
        }
    }

    /// Acknowledge receipt.
    pub fn ack(&self) {
        self.ack.ack();
    }

    /// Whether the request has been acknowledged.
    pub fn is_acknowledged(&self) -> bool {
        self.ack.is_acknowledged()
    }

    /// A handle for acknowledging from elsewhere.
    pub fn acknowledger(&self) -> Acknowledger {
        self.ack.clone()
    }

    /// Split into address, payload and acknowledger.
    pub fn into_parts(self) -> (String, Value, Acknowledger) {
        (self.name, self.data, self.ack)
    }
}

/// Second phase of the response: what the provider decided.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcOutcome {
    /// The call produced a value.
    Value(Value),
    /// The provider cannot serve the call now; the broker may reroute it.
    Rejected,
    /// The call failed with a message.
    Error(String),
}

impl RpcOutcome {
    /// Shorthand for an error outcome.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Whether this outcome carries a value.
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

/// Result of an outgoing RPC call made through [`crate::Gateway::make`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResult {
    /// Whether the call succeeded.
    pub success: bool,
    /// Result payload (present when `success == true`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message (present when `success == false`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResult {
    /// A successful result.
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Map a provider's outcome onto what the caller receives.
    pub fn from_outcome(outcome: RpcOutcome) -> Self {
        match outcome {
            RpcOutcome::Value(v) => Self::success(v),
            RpcOutcome::Rejected => Self::failure(NO_RPC_PROVIDER),
            RpcOutcome::Error(message) => Self::failure(message),
        }
    }

    /// The payload of a successful call, treating JSON `null` as absent.
    pub fn data(&self) -> Option<&Value> {
        if !self.success {
            return None;
        }
        self.data.as_ref().filter(|v| !v.is_null())
    }
}
