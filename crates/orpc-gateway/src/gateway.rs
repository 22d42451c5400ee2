//! The gateway collaborator interface.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::GatewayError;
use crate::types::{ConnectionState, RpcOutcome, RpcRequest, RpcResult};

/// Trait implemented by everything published under an address.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Serve one request. Acknowledge through `request` before doing slow
    /// work; the returned outcome is the response.
    async fn handle(&self, request: RpcRequest) -> RpcOutcome;
}

/// Receives connection-state transitions.
///
/// Called synchronously from whatever context changed the state; must not
/// block.
pub trait ConnectionListener: Send + Sync {
    /// The connection moved to `state`.
    fn connection_state_changed(&self, state: ConnectionState);
}

/// Handle returned by [`Gateway::add_connection_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// A logged-in connection to a pub/sub + RPC broker.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Publish `handler` under `address`.
    fn provide(&self, address: &str, handler: Arc<dyn RequestHandler>) -> Result<(), GatewayError>;

    /// Withdraw `address`. Withdrawing an address that is not published is
    /// not an error.
    fn unprovide(&self, address: &str) -> Result<(), GatewayError>;

    /// Call the provider of `address` and wait for its response.
    async fn make(&self, address: &str, payload: Value) -> RpcResult;

    /// Subscribe to connection-state transitions.
    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> ListenerId;

    /// Unsubscribe a listener. Unknown ids are ignored.
    fn remove_connection_listener(&self, id: ListenerId);
}
