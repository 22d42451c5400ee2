//! The application-facing facade.
//!
//! Serving side: provider registration through [`GlobalProviderRegistry`],
//! session-scoped providers through [`SessionLifecycleController`].
//! Consuming side: at most one session held at a time, with its callbacks
//! published under `<sessionId>/<method>`.

use std::sync::Arc;

use orpc_gateway::{ConnectionListener, ConnectionState, Gateway, ListenerId, RequestHandler};
use orpc_settings::SessionSettings;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::address::callback_address;
use crate::callbacks::{CallbackProvider, HeartbeatResponder};
use crate::constants::{CREATE_SESSION_ADDRESS, DESTROY_SESSION_ADDRESS, SESSION_NOT_FOUND};
use crate::descriptor::{ProviderFactory, ServiceProvider};
use crate::errors::{Result, RpcHandlerError};
use crate::lifecycle::SessionLifecycleController;
use crate::listener::WeakListener;
use crate::registry::GlobalProviderRegistry;
use crate::session::Session;

#[derive(Default)]
struct ConsumerState {
    session: Option<Session>,
    callbacks: Vec<(String, Arc<dyn RequestHandler>)>,
}

/// The consumer's side of a session.
struct ConsumerSession {
    gateway: Arc<dyn Gateway>,
    state: Mutex<ConsumerState>,
}

impl ConsumerSession {
    fn session(&self) -> Option<Session> {
        self.state.lock().session.clone()
    }

    fn begin(&self, session: Session) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(held) = &state.session {
            return Err(RpcHandlerError::SessionAlreadyStarted {
                session_id: held.id().clone(),
            });
        }
        state.session = Some(session);
        Ok(())
    }

    fn publish(&self, callback: Arc<dyn CallbackProvider>) -> Result<()> {
        let mut state = self.state.lock();
        let session = state.session.clone().ok_or(RpcHandlerError::NoActiveSession)?;
        for method in callback.methods(&session) {
            let address = callback_address(session.id(), method.rpc_name());
            let handler = method.handler();
            self.gateway.provide(&address, Arc::clone(&handler))?;
            debug!(address, "published callback");
            state.callbacks.retain(|(a, _)| *a != address);
            state.callbacks.push((address, handler));
        }
        Ok(())
    }

    /// Forget the session and withdraw its callbacks.
    fn end(&self) -> Option<Session> {
        let mut state = self.state.lock();
        for (address, _) in state.callbacks.drain(..) {
            if let Err(err) = self.gateway.unprovide(&address) {
                warn!(address, error = %err, "failed to withdraw callback");
            }
        }
        state.session.take()
    }
}

impl ConnectionListener for ConsumerSession {
    fn connection_state_changed(&self, state: ConnectionState) {
        if !state.is_open() {
            return;
        }
        let consumer = self.state.lock();
        for (address, handler) in &consumer.callbacks {
            if let Err(err) = self.gateway.provide(address, Arc::clone(handler)) {
                warn!(address, error = %err, "failed to republish callback");
            }
        }
    }
}

/// Registers providers, manages the session lifecycle and holds the
/// consumer session.
pub struct ProtoRpcHandler {
    gateway: Arc<dyn Gateway>,
    registry: Arc<GlobalProviderRegistry>,
    controller: RwLock<Arc<SessionLifecycleController>>,
    consumer: Arc<ConsumerSession>,
    listener: Mutex<Option<ListenerId>>,
}

impl ProtoRpcHandler {
    /// Facade over `gateway` using `controller` for sessions. The
    /// controller is started.
    pub fn new(gateway: Arc<dyn Gateway>, controller: Arc<SessionLifecycleController>) -> Self {
        let registry = GlobalProviderRegistry::new(Arc::clone(&gateway));
        registry.set_session_controller(Arc::clone(&controller));
        controller.start();

        let consumer = Arc::new(ConsumerSession {
            gateway: Arc::clone(&gateway),
            state: Mutex::new(ConsumerState::default()),
        });
        let listener = gateway.add_connection_listener(WeakListener::new(&consumer));

        Self {
            gateway,
            registry,
            controller: RwLock::new(controller),
            consumer,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Facade with a default session controller configured from `settings`.
    pub fn with_settings(gateway: Arc<dyn Gateway>, settings: &SessionSettings) -> Self {
        let controller = SessionLifecycleController::with_settings(Arc::clone(&gateway), settings);
        Self::new(gateway, controller)
    }

    /// The global provider registry.
    pub fn registry(&self) -> &Arc<GlobalProviderRegistry> {
        &self.registry
    }

    /// The current session controller.
    pub fn session_controller(&self) -> Arc<SessionLifecycleController> {
        Arc::clone(&*self.controller.read())
    }

    /// Register providers; session-scoped ones go to the session controller.
    pub fn register(&self, factories: &[ProviderFactory]) -> &Self {
        let _ = self.registry.register(factories);
        self
    }

    /// Withdraw a global provider.
    pub fn unregister(&self, provider: &dyn ServiceProvider) -> Result<&Self> {
        self.registry.unregister(provider)?;
        Ok(self)
    }

    /// Withdraw every global provider. Returns the number of addresses that
    /// could not be withdrawn.
    pub fn unregister_all(&self) -> usize {
        self.registry.unregister_all()
    }

    /// Replace the session controller. The previous controller is shut down
    /// and its sessions closed.
    pub async fn set_session_controller(&self, controller: Arc<SessionLifecycleController>) {
        let previous = std::mem::replace(&mut *self.controller.write(), Arc::clone(&controller));
        if !Arc::ptr_eq(&previous, &controller) {
            let closed = previous.shutdown().await;
            info!(closed, "replaced session controller");
        }
        self.registry.set_session_controller(Arc::clone(&controller));
        controller.start();
    }

    /// Open a session with the remote controller and publish the heartbeat
    /// responder plus `callbacks` for it.
    pub async fn start_session(&self, callbacks: Vec<Arc<dyn CallbackProvider>>) -> Result<Session> {
        self.start_session_with(Value::Null, callbacks).await
    }

    /// Like [`ProtoRpcHandler::start_session`], sending `request_data` as
    /// the creation payload.
    pub async fn start_session_with(
        &self,
        request_data: Value,
        callbacks: Vec<Arc<dyn CallbackProvider>>,
    ) -> Result<Session> {
        if let Some(held) = self.consumer.session() {
            return Err(RpcHandlerError::SessionAlreadyStarted {
                session_id: held.id().clone(),
            });
        }

        let result = self.gateway.make(CREATE_SESSION_ADDRESS, request_data).await;
        let Some(data) = result.data().cloned() else {
            return Err(RpcHandlerError::Remote {
                address: CREATE_SESSION_ADDRESS.to_owned(),
                message: result.error.unwrap_or_else(|| "empty reply".to_owned()),
            });
        };
        let session: Session = serde_json::from_value(data)?;

        if let Err(err) = self.consumer.begin(session.clone()) {
            warn!(session_id = %session.id(), "session started concurrently, destroying duplicate");
            let _ = self
                .gateway
                .make(DESTROY_SESSION_ADDRESS, Value::String(session.id().to_string()))
                .await;
            return Err(err);
        }
        info!(session_id = %session.id(), "session started");

        self.consumer.publish(Arc::new(HeartbeatResponder))?;
        for callback in callbacks {
            self.consumer.publish(callback)?;
        }
        Ok(session)
    }

    /// Publish `callback` for the held session.
    pub fn register_callback(&self, callback: Arc<dyn CallbackProvider>) -> Result<()> {
        self.consumer.publish(callback)
    }

    /// Destroy the held session remotely, then withdraw its callbacks.
    ///
    /// Returns `false` when the server no longer knows the session (for
    /// example after it was reclaimed by a missed heartbeat); the local
    /// session is forgotten either way.
    pub async fn close_session(&self) -> Result<bool> {
        let session = self.consumer.session().ok_or(RpcHandlerError::NoActiveSession)?;
        let result = self
            .gateway
            .make(DESTROY_SESSION_ADDRESS, Value::String(session.id().to_string()))
            .await;
        if result.error.as_deref() == Some(SESSION_NOT_FOUND) {
            let _ = self.consumer.end();
            warn!(session_id = %session.id(), "session already gone on the server, forgetting it");
            return Ok(false);
        }
        if !result.success {
            return Err(RpcHandlerError::Remote {
                address: DESTROY_SESSION_ADDRESS.to_owned(),
                message: result.error.unwrap_or_default(),
            });
        }
        let _ = self.consumer.end();
        info!(session_id = %session.id(), "session closed");
        Ok(result.data().and_then(Value::as_bool).unwrap_or(true))
    }

    /// The held session.
    pub fn session(&self) -> Option<Session> {
        self.consumer.session()
    }

    /// Withdraw everything this handler published. Nothing is closed
    /// remotely; a held session is forgotten.
    pub async fn shutdown(&self) {
        let remaining = self.registry.unregister_all();
        if remaining > 0 {
            warn!(remaining, "some global methods could not be withdrawn");
        }
        let controller = self.session_controller();
        let _ = controller.shutdown().await;
        if let Some(session) = self.consumer.end() {
            debug!(session_id = %session.id(), "dropped consumer session");
        }
        let listener = self.listener.lock().take();
        if let Some(id) = listener {
            self.gateway.remove_connection_listener(id);
        }
        info!("rpc handler shut down");
    }
}

impl Drop for ProtoRpcHandler {
    fn drop(&mut self) {
        if let Some(id) = self.listener.get_mut().take() {
            self.gateway.remove_connection_listener(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{MethodDescriptor, ProviderScope};
    use crate::heartbeat::HeartbeatConfig;
    use crate::session::{DefaultSessionHooks, SessionManager};
    use assert_matches::assert_matches;
    use orpc_core::MethodError;
    use orpc_gateway::MemoryBroker;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct Notes;

    impl CallbackProvider for Notes {
        fn methods(self: Arc<Self>, _session: &Session) -> Vec<MethodDescriptor> {
            vec![MethodDescriptor::indirect("note", |text: String| async move {
                Ok::<_, MethodError>(text.len())
            })]
        }
    }

    #[derive(Default)]
    struct SessionDummy;

    impl ServiceProvider for SessionDummy {
        fn interface_name(&self) -> &str {
            "SessionDummy"
        }

        fn scope(&self) -> ProviderScope {
            ProviderScope::Session
        }

        fn methods(self: Arc<Self>) -> Vec<MethodDescriptor> {
            vec![MethodDescriptor::indirect("ping", |()| async { Ok::<_, MethodError>("pong") })]
        }
    }

    fn fast_controller(gateway: Arc<dyn Gateway>) -> Arc<SessionLifecycleController> {
        SessionLifecycleController::new(
            gateway,
            Arc::new(SessionManager::new()),
            Arc::new(DefaultSessionHooks),
            HeartbeatConfig {
                interval: Duration::from_secs(1),
                timeout: Duration::from_millis(500),
            },
        )
    }

    fn pair() -> (Arc<MemoryBroker>, ProtoRpcHandler, ProtoRpcHandler) {
        let broker = MemoryBroker::new();
        let server_gw = broker.connect();
        let server = ProtoRpcHandler::new(server_gw.clone(), fast_controller(server_gw));
        let client_gw = broker.connect();
        let client = ProtoRpcHandler::new(client_gw.clone(), fast_controller(client_gw));
        (broker, server, client)
    }

    #[tokio::test(start_paused = true)]
    async fn start_session_publishes_heartbeat_and_callbacks() {
        let (broker, _server, client) = pair();
        let session = client.start_session(vec![Arc::new(Notes)]).await.unwrap();
        let id = session.id();
        assert!(broker.is_provided(&format!("{id}/heartbeat")));
        assert!(broker.is_provided(&format!("{id}/note")));
        assert_eq!(client.session(), Some(session.clone()));
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_fails() {
        let (_broker, _server, client) = pair();
        let session = client.start_session(Vec::new()).await.unwrap();
        let err = client.start_session(Vec::new()).await.unwrap_err();
        assert_matches!(err, RpcHandlerError::SessionAlreadyStarted { session_id } if session_id == *session.id());
    }

    #[tokio::test(start_paused = true)]
    async fn close_session_withdraws_callbacks() {
        let (broker, server, client) = pair();
        let session = client.start_session(vec![Arc::new(Notes)]).await.unwrap();
        assert!(client.close_session().await.unwrap());
        assert!(client.session().is_none());
        assert!(!broker.is_provided(&format!("{}/heartbeat", session.id())));
        assert!(server.session_controller().sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_without_session_fails() {
        let (_broker, _server, client) = pair();
        assert_matches!(client.close_session().await, Err(RpcHandlerError::NoActiveSession));
    }

    #[tokio::test(start_paused = true)]
    async fn register_callback_needs_a_session() {
        let (_broker, _server, client) = pair();
        assert_matches!(
            client.register_callback(Arc::new(Notes)),
            Err(RpcHandlerError::NoActiveSession)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn session_scoped_registration_reaches_controller() {
        let (broker, server, client) = pair();
        let _ = server.register(&[ProviderFactory::of::<SessionDummy>()]);
        let session = client.start_session(Vec::new()).await.unwrap();

        let gw = broker.connect();
        let reply = gw.make(&format!("{}/SessionDummy/ping", session.id()), Value::Null).await;
        assert_eq!(reply.data(), Some(&json!("pong")));
        assert_matches!(
            server.unregister(&SessionDummy).map(|_| ()),
            Err(RpcHandlerError::SessionScopedProvider { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn swapping_controller_closes_old_sessions() {
        let (broker, server, client) = pair();
        let _ = client.start_session(Vec::new()).await.unwrap();
        let old = server.session_controller();
        assert_eq!(old.sessions().len(), 1);

        let server_gw = broker.connect();
        let replacement = fast_controller(server_gw);
        server.set_session_controller(replacement.clone()).await;
        assert!(old.sessions().is_empty());
        assert!(Arc::ptr_eq(&server.session_controller(), &replacement));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_detaches_listeners() {
        let broker = MemoryBroker::new();
        let gw = broker.connect();
        let handler = ProtoRpcHandler::new(gw.clone(), fast_controller(gw.clone()));
        assert_eq!(gw.listener_count(), 3);
        handler.shutdown().await;
        assert_eq!(gw.listener_count(), 1);
        drop(handler);
        assert_eq!(gw.listener_count(), 0);
    }
}
