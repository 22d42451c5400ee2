//! Per-session liveness probing.
//!
//! The server calls `<sessionId>/heartbeat` on the consumer at a fixed
//! interval. A failed, timed-out or empty reply ends the loop; the session
//! controller then tears the session down.

use std::sync::Arc;
use std::time::Duration;

use orpc_core::SessionId;
use orpc_gateway::Gateway;
use orpc_settings::SessionSettings;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::address::callback_address;
use crate::constants::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT, HEARTBEAT_ADDRESS};

/// Heartbeat timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Pause before each probe.
    pub interval: Duration,
    /// Upper bound for one probe.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

impl From<&SessionSettings> for HeartbeatConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.heartbeat_interval_ms),
            timeout: Duration::from_millis(settings.heartbeat_timeout_ms),
        }
    }
}

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// A probe failed or timed out.
    Unresponsive,
    /// The loop was cancelled externally.
    Cancelled,
}

/// Probe the consumer of `session_id` until it stops answering or `cancel`
/// fires.
///
/// A reply that does not echo the session id still counts as alive.
pub async fn run_heartbeat(
    gateway: Arc<dyn Gateway>,
    session_id: SessionId,
    config: HeartbeatConfig,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let address = callback_address(&session_id, HEARTBEAT_ADDRESS);
    let payload = Value::String(session_id.to_string());

    loop {
        tokio::select! {
            () = time::sleep(config.interval) => {}
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }

        let probe = time::timeout(config.timeout, gateway.make(&address, payload.clone()));
        let reply = tokio::select! {
            reply = probe => reply,
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        };

        let Ok(result) = reply else {
            debug!(session_id = %session_id, "heartbeat timed out");
            return HeartbeatResult::Unresponsive;
        };
        match result.data() {
            Some(echo) => {
                if echo.as_str() != Some(session_id.as_str()) {
                    debug!(session_id = %session_id, reply = %echo, "heartbeat reply does not echo session id");
                }
            }
            None => {
                debug!(session_id = %session_id, error = ?result.error, "heartbeat failed");
                return HeartbeatResult::Unresponsive;
            }
        }
    }
}

/// A running heartbeat loop.
#[derive(Debug)]
pub struct HeartbeatHandle {
    /// Stops the loop.
    pub cancel: CancellationToken,
    /// The spawned task.
    pub task: JoinHandle<()>,
}
