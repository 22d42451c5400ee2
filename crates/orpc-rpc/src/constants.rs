//! Well-known addresses and defaults shared with remote peers.

use std::time::Duration;

/// Address of the session creation endpoint.
pub const CREATE_SESSION_ADDRESS: &str = "createSession";

/// Address of the session destruction endpoint.
pub const DESTROY_SESSION_ADDRESS: &str = "destroySession";

/// Method name of the consumer-side heartbeat callback; the full address is
/// `<sessionId>/heartbeat`.
pub const HEARTBEAT_ADDRESS: &str = "heartbeat";

/// Pause between two heartbeat probes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);

/// Upper bound for one heartbeat probe.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Reply to `createSession` when session-scoped providers could not be published.
pub const SESSION_CREATE_FAILED: &str = "Failed to instantiate new session.";

/// Reply to `destroySession` when the input matches no session.
pub const SESSION_NOT_FOUND: &str = "Session to be destroyed cannot be found.";
