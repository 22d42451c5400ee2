//! Gateway wrapper with injectable provide/unprovide failures. A failure
//! pattern matches every address ending with it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use orpc_gateway::{
    ConnectionListener, ConnectionState, Gateway, GatewayError, ListenerId, MemoryClient,
    RequestHandler, RpcResult,
};
use parking_lot::Mutex;
use serde_json::Value;

pub(crate) struct FlakyGateway {
    inner: Arc<MemoryClient>,
    fail_provide: Mutex<HashSet<String>>,
    fail_unprovide: Mutex<HashSet<String>>,
}

impl FlakyGateway {
    pub(crate) fn new(inner: Arc<MemoryClient>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_provide: Mutex::new(HashSet::new()),
            fail_unprovide: Mutex::new(HashSet::new()),
        })
    }

    pub(crate) fn fail_provide(&self, suffix: &str) {
        let _ = self.fail_provide.lock().insert(suffix.to_owned());
    }

    pub(crate) fn fail_unprovide(&self, suffix: &str) {
        let _ = self.fail_unprovide.lock().insert(suffix.to_owned());
    }

    pub(crate) fn clear_failures(&self) {
        self.fail_provide.lock().clear();
        self.fail_unprovide.lock().clear();
    }
}

fn matches_any(patterns: &Mutex<HashSet<String>>, address: &str) -> bool {
    patterns.lock().iter().any(|suffix| address.ends_with(suffix.as_str()))
}

fn injected() -> GatewayError {
    GatewayError::Transport("injected failure".into())
}

#[async_trait]
impl Gateway for FlakyGateway {
    fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    fn provide(&self, address: &str, handler: Arc<dyn RequestHandler>) -> Result<(), GatewayError> {
        if matches_any(&self.fail_provide, address) {
            return Err(injected());
        }
        self.inner.provide(address, handler)
    }

    fn unprovide(&self, address: &str) -> Result<(), GatewayError> {
        if matches_any(&self.fail_unprovide, address) {
            return Err(injected());
        }
        self.inner.unprovide(address)
    }

    async fn make(&self, address: &str, payload: Value) -> RpcResult {
        self.inner.make(address, payload).await
    }

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> ListenerId {
        self.inner.add_connection_listener(listener)
    }

    fn remove_connection_listener(&self, id: ListenerId) {
        self.inner.remove_connection_listener(id);
    }
}
