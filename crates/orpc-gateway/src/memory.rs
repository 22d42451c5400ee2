//! In-process broker.
//!
//! A [`MemoryBroker`] owns the address table. Every [`MemoryClient`] is one
//! logged-in connection with its own [`ConnectionState`]. Like a networked
//! broker, it forgets every address of a connection the moment that
//! connection leaves `Open`, so reconnect handling is exercised for real.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::GatewayError;
use crate::gateway::{ConnectionListener, Gateway, ListenerId, RequestHandler};
use crate::types::{
    Acknowledger, CONNECTION_CLOSED, ConnectionState, NO_RPC_PROVIDER, RESPONSE_TIMEOUT,
    RpcRequest, RpcResult,
};

/// Broker tuning.
#[derive(Clone, Debug)]
pub struct MemoryConfig {
    /// How long `make` waits for a provider before giving up.
    pub response_timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(10),
        }
    }
}

struct Provided {
    owner: u64,
    handler: Arc<dyn RequestHandler>,
}

/// Shared address table for a set of in-process connections.
pub struct MemoryBroker {
    providers: Mutex<HashMap<String, Provided>>,
    next_client: AtomicU64,
    config: MemoryConfig,
}

impl MemoryBroker {
    /// Create a broker with default settings.
    pub fn new() -> Arc<Self> {
        Self::with_config(MemoryConfig::default())
    }

    /// Create a broker with explicit settings.
    pub fn with_config(config: MemoryConfig) -> Arc<Self> {
        Arc::new(Self {
            providers: Mutex::new(HashMap::new()),
            next_client: AtomicU64::new(1),
            config,
        })
    }

    /// Open a new connection to this broker.
    pub fn connect(self: &Arc<Self>) -> Arc<MemoryClient> {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        debug!(client_id = id, "memory client connected");
        Arc::new(MemoryClient {
            id,
            broker: Arc::clone(self),
            state: Mutex::new(ConnectionState::Open),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            withdrawals: Mutex::new(HashMap::new()),
        })
    }

    /// Every address currently provided by any connection (sorted).
    pub fn addresses(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether some connection provides `address`.
    pub fn is_provided(&self, address: &str) -> bool {
        self.providers.lock().contains_key(address)
    }

    fn handler_for(&self, address: &str) -> Option<Arc<dyn RequestHandler>> {
        self.providers
            .lock()
            .get(address)
            .map(|p| Arc::clone(&p.handler))
    }

    fn drop_owner(&self, owner: u64) -> usize {
        let mut providers = self.providers.lock();
        let before = providers.len();
        providers.retain(|_, p| p.owner != owner);
        before - providers.len()
    }
}

/// One connection to a [`MemoryBroker`].
pub struct MemoryClient {
    id: u64,
    broker: Arc<MemoryBroker>,
    state: Mutex<ConnectionState>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ConnectionListener>)>>,
    next_listener: AtomicU64,
    withdrawals: Mutex<HashMap<String, usize>>,
}

impl MemoryClient {
    /// Connection id, unique per broker.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The broker this client is attached to.
    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    /// Move the connection to `state` and notify listeners.
    ///
    /// Leaving `Open` drops every address this connection provided. Setting
    /// the current state again is a no-op.
    pub fn set_connection_state(&self, state: ConnectionState) {
        let previous = {
            let mut current = self.state.lock();
            std::mem::replace(&mut *current, state)
        };
        if previous == state {
            return;
        }
        if previous.is_open() {
            let dropped = self.broker.drop_owner(self.id);
            debug!(client_id = self.id, dropped, %state, "connection left OPEN");
        }

        let listeners: Vec<Arc<dyn ConnectionListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.connection_state_changed(state);
        }
    }

    /// How many times `address` was withdrawn through this connection.
    pub fn withdrawal_count(&self, address: &str) -> usize {
        self.withdrawals.lock().get(address).copied().unwrap_or(0)
    }

    /// Number of attached connection listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

#[async_trait]
impl Gateway for MemoryClient {
    fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn provide(&self, address: &str, handler: Arc<dyn RequestHandler>) -> Result<(), GatewayError> {
        if !self.connection_state().is_open() {
            return Err(GatewayError::NotConnected);
        }
        let mut providers = self.broker.providers.lock();
        if let Some(existing) = providers.get(address) {
            if existing.owner != self.id {
                return Err(GatewayError::AlreadyProvided {
                    address: address.to_owned(),
                });
            }
        }
        let _ = providers.insert(
            address.to_owned(),
            Provided {
                owner: self.id,
                handler,
            },
        );
        Ok(())
    }

    fn unprovide(&self, address: &str) -> Result<(), GatewayError> {
        {
            let mut providers = self.broker.providers.lock();
            match providers.get(address) {
                Some(p) if p.owner != self.id => {
                    return Err(GatewayError::NotOwner {
                        address: address.to_owned(),
                    });
                }
                Some(_) => {
                    let _ = providers.remove(address);
                }
                None => {}
            }
        }
        *self
            .withdrawals
            .lock()
            .entry(address.to_owned())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn make(&self, address: &str, payload: Value) -> RpcResult {
        if !self.connection_state().is_open() {
            return RpcResult::failure(CONNECTION_CLOSED);
        }
        let Some(handler) = self.broker.handler_for(address) else {
            return RpcResult::failure(NO_RPC_PROVIDER);
        };

        let ack = Acknowledger::new();
        let request = RpcRequest::with_acknowledger(address, payload, ack.clone());
        let timeout = self.broker.config.response_timeout;

        match tokio::time::timeout(timeout, handler.handle(request)).await {
            Ok(outcome) => {
                if !ack.is_acknowledged() {
                    debug!(address, "provider answered without acknowledging");
                }
                RpcResult::from_outcome(outcome)
            }
            Err(_elapsed) => {
                warn!(address, ?timeout, "rpc response timed out");
                RpcResult::failure(RESPONSE_TIMEOUT)
            }
        }
    }

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove_connection_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RpcOutcome;
    use assert_matches::assert_matches;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, request: RpcRequest) -> RpcOutcome {
            request.ack();
            RpcOutcome::Value(request.data)
        }
    }

    struct RejectHandler;

    #[async_trait]
    impl RequestHandler for RejectHandler {
        async fn handle(&self, _request: RpcRequest) -> RpcOutcome {
            RpcOutcome::Rejected
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl RequestHandler for SlowHandler {
        async fn handle(&self, _request: RpcRequest) -> RpcOutcome {
            tokio::time::sleep(Duration::from_secs(120)).await;
            RpcOutcome::Value(json!("late"))
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        states: Mutex<Vec<ConnectionState>>,
    }

    impl ConnectionListener for RecordingListener {
        fn connection_state_changed(&self, state: ConnectionState) {
            self.states.lock().push(state);
        }
    }

    #[tokio::test]
    async fn provide_and_make_roundtrip() {
        let broker = MemoryBroker::new();
        let server = broker.connect();
        let client = broker.connect();
        server.provide("svc/echo", Arc::new(EchoHandler)).unwrap();

        let result = client.make("svc/echo", json!({"msg": "hi"})).await;
        assert!(result.success);
        assert_eq!(result.data, Some(json!({"msg": "hi"})));
    }

    #[tokio::test]
    async fn make_without_provider() {
        let broker = MemoryBroker::new();
        let client = broker.connect();
        let result = client.make("nobody/home", Value::Null).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(NO_RPC_PROVIDER));
    }

    #[tokio::test]
    async fn rejected_maps_to_no_provider() {
        let broker = MemoryBroker::new();
        let client = broker.connect();
        client.provide("busy/call", Arc::new(RejectHandler)).unwrap();
        let result = client.make("busy/call", Value::Null).await;
        assert_eq!(result.error.as_deref(), Some(NO_RPC_PROVIDER));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let broker = MemoryBroker::with_config(MemoryConfig {
            response_timeout: Duration::from_millis(50),
        });
        let client = broker.connect();
        client.provide("slow/call", Arc::new(SlowHandler)).unwrap();
        let result = client.make("slow/call", Value::Null).await;
        assert_eq!(result.error.as_deref(), Some(RESPONSE_TIMEOUT));
    }

    #[test]
    fn address_owned_by_other_connection() {
        let broker = MemoryBroker::new();
        let a = broker.connect();
        let b = broker.connect();
        a.provide("x/y", Arc::new(EchoHandler)).unwrap();

        assert_matches!(
            b.provide("x/y", Arc::new(EchoHandler)),
            Err(GatewayError::AlreadyProvided { .. })
        );
        assert_matches!(b.unprovide("x/y"), Err(GatewayError::NotOwner { .. }));
        // same owner may replace its own handler
        a.provide("x/y", Arc::new(RejectHandler)).unwrap();
    }

    #[test]
    fn provide_requires_open_connection() {
        let broker = MemoryBroker::new();
        let client = broker.connect();
        client.set_connection_state(ConnectionState::Closed);
        assert_matches!(
            client.provide("a/b", Arc::new(EchoHandler)),
            Err(GatewayError::NotConnected)
        );
    }

    #[test]
    fn leaving_open_drops_addresses() {
        let broker = MemoryBroker::new();
        let a = broker.connect();
        let b = broker.connect();
        a.provide("a/one", Arc::new(EchoHandler)).unwrap();
        b.provide("b/one", Arc::new(EchoHandler)).unwrap();

        a.set_connection_state(ConnectionState::Reconnecting);
        assert_eq!(broker.addresses(), vec!["b/one"]);
    }

    #[tokio::test]
    async fn make_on_closed_connection() {
        let broker = MemoryBroker::new();
        let client = broker.connect();
        client.set_connection_state(ConnectionState::Error);
        let result = client.make("a/b", Value::Null).await;
        assert_eq!(result.error.as_deref(), Some(CONNECTION_CLOSED));
    }

    #[test]
    fn listeners_see_transitions_once() {
        let broker = MemoryBroker::new();
        let client = broker.connect();
        let listener = Arc::new(RecordingListener::default());
        let id = client.add_connection_listener(listener.clone());

        client.set_connection_state(ConnectionState::Reconnecting);
        client.set_connection_state(ConnectionState::Reconnecting);
        client.set_connection_state(ConnectionState::Open);
        assert_eq!(
            *listener.states.lock(),
            vec![ConnectionState::Reconnecting, ConnectionState::Open]
        );

        client.remove_connection_listener(id);
        assert_eq!(client.listener_count(), 0);
        client.set_connection_state(ConnectionState::Closed);
        assert_eq!(listener.states.lock().len(), 2);
    }

    #[test]
    fn withdrawals_are_counted() {
        let broker = MemoryBroker::new();
        let client = broker.connect();
        client.provide("a/b", Arc::new(EchoHandler)).unwrap();
        client.unprovide("a/b").unwrap();
        client.unprovide("a/b").unwrap();
        assert_eq!(client.withdrawal_count("a/b"), 2);
        assert_eq!(client.withdrawal_count("c/d"), 0);
        assert!(!broker.is_provided("a/b"));
    }
}
