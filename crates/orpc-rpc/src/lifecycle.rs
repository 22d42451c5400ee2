//! Session lifecycle on the serving side.
//!
//! The controller publishes `createSession` and `destroySession`. Each
//! created session gets a fresh instance of every registered session-scoped
//! provider, published under `<sessionId>/<Provider>/<method>`, and a
//! heartbeat monitor. Teardown withdraws those addresses, drops the session
//! and stops its monitor.
//!
//! Lock order: `index`, then the session manager, then `monitors`. No lock
//! is held across an await.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use orpc_core::SessionId;
use orpc_gateway::{
    ConnectionListener, ConnectionState, Gateway, GatewayError, ListenerId, RequestHandler,
    RpcOutcome, RpcRequest,
};
use orpc_settings::SessionSettings;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::address::method_address;
use crate::constants::{
    CREATE_SESSION_ADDRESS, DESTROY_SESSION_ADDRESS, SESSION_CREATE_FAILED, SESSION_NOT_FOUND,
};
use crate::descriptor::{ProviderDescriptor, ProviderFactory, ProviderScope};
use crate::errors::SessionSetupError;
use crate::heartbeat::{HeartbeatConfig, HeartbeatHandle, HeartbeatResult, run_heartbeat};
use crate::listener::WeakListener;
use crate::session::{DefaultSessionHooks, Session, SessionHooks, SessionManager};

/// Upper bound for heartbeat tasks to wind down during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a session is being torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownReason {
    /// The consumer called `destroySession`.
    Destroyed,
    /// The consumer stopped answering heartbeats.
    HeartbeatFailed,
    /// The controller is shutting down.
    Shutdown,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Destroyed => "destroyed",
            Self::HeartbeatFailed => "heartbeat_failed",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Result of [`SessionLifecycleController::teardown`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Every address was withdrawn and the session is gone.
    Completed,
    /// Some addresses could not be withdrawn; the session stays registered
    /// with only those addresses.
    Partial {
        /// Addresses still published.
        addresses: usize,
        /// Providers still holding addresses.
        providers: usize,
    },
    /// No such session is indexed.
    NotFound,
}

enum Withdrawal {
    NotFound,
    Partial { addresses: usize, providers: usize },
    Complete(Option<Arc<Session>>),
}

#[derive(Default)]
struct SessionIndex {
    /// Session to provider interface name to published addresses.
    providers: HashMap<SessionId, HashMap<String, Vec<String>>>,
    /// Address to handler, for republishing after a reconnect.
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

/// Creates, monitors and tears down sessions.
pub struct SessionLifecycleController {
    gateway: Arc<dyn Gateway>,
    sessions: Arc<SessionManager>,
    hooks: Arc<dyn SessionHooks>,
    heartbeat: HeartbeatConfig,
    factories: RwLock<Vec<ProviderFactory>>,
    index: Mutex<SessionIndex>,
    monitors: Mutex<HashMap<SessionId, HeartbeatHandle>>,
    create_endpoint: Arc<dyn RequestHandler>,
    destroy_endpoint: Arc<dyn RequestHandler>,
    listener: Mutex<Option<ListenerId>>,
    shutdown: CancellationToken,
    weak_self: Weak<Self>,
}

impl SessionLifecycleController {
    /// Controller publishing through `gateway`. Nothing is published until
    /// [`SessionLifecycleController::start`].
    pub fn new(
        gateway: Arc<dyn Gateway>,
        sessions: Arc<SessionManager>,
        hooks: Arc<dyn SessionHooks>,
        heartbeat: HeartbeatConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| Self {
            gateway,
            sessions,
            hooks,
            heartbeat,
            factories: RwLock::new(Vec::new()),
            index: Mutex::new(SessionIndex::default()),
            monitors: Mutex::new(HashMap::new()),
            create_endpoint: Arc::new(CreateSessionEndpoint(weak.clone())),
            destroy_endpoint: Arc::new(DestroySessionEndpoint(weak.clone())),
            listener: Mutex::new(None),
            shutdown: CancellationToken::new(),
            weak_self: weak.clone(),
        })
    }

    /// Controller with [`DefaultSessionHooks`], a fresh session manager and
    /// heartbeat timing from `settings`.
    pub fn with_settings(gateway: Arc<dyn Gateway>, settings: &SessionSettings) -> Arc<Self> {
        Self::new(
            gateway,
            Arc::new(SessionManager::new()),
            Arc::new(DefaultSessionHooks),
            HeartbeatConfig::from(settings),
        )
    }

    /// Follow connection state and publish the session endpoints if the
    /// connection is open. Calling it again is harmless.
    pub fn start(&self) {
        {
            let mut listener = self.listener.lock();
            if listener.is_none() {
                *listener = Some(
                    self.gateway
                        .add_connection_listener(WeakListener::from_weak(self.weak_self.clone())),
                );
            }
        }
        if self.gateway.connection_state().is_open() {
            self.provide_endpoints();
        }
    }

    /// Add session-scoped provider factories. Factories producing global
    /// providers are discarded. Only sessions created afterwards get the
    /// new providers.
    pub fn register(&self, factories: &[ProviderFactory]) {
        let mut registered = self.factories.write();
        for factory in factories {
            let provider = factory.instantiate();
            if provider.scope() != ProviderScope::Session {
                warn!(
                    provider = provider.interface_name(),
                    "discarding provider that is not session-scoped"
                );
                continue;
            }
            info!(provider = provider.interface_name(), "registered session provider");
            registered.push(factory.clone());
        }
    }

    /// The session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Heartbeat timing applied to new sessions.
    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    /// Session to provider name to published addresses.
    pub fn list_provided_methods(&self) -> HashMap<SessionId, HashMap<String, Vec<String>>> {
        self.index.lock().providers.clone()
    }

    /// Every address published for `session_id`, sorted.
    pub fn session_addresses(&self, session_id: &SessionId) -> Vec<String> {
        let index = self.index.lock();
        let mut addresses: Vec<String> = index
            .providers
            .get(session_id)
            .map(|providers| providers.values().flatten().cloned().collect())
            .unwrap_or_default();
        addresses.sort();
        addresses
    }

    /// Whether a heartbeat monitor runs for `session_id`.
    pub fn is_monitored(&self, session_id: &SessionId) -> bool {
        self.monitors.lock().contains_key(session_id)
    }

    /// Serve a `createSession` payload.
    pub async fn handle_create(&self, input: Value) -> RpcOutcome {
        if self.shutdown.is_cancelled() {
            warn!("session controller is shut down, refusing new session");
            return RpcOutcome::error(SESSION_CREATE_FAILED);
        }
        let session = match self.hooks.create_session(input).await {
            Ok(session) => session,
            Err(rejected) => {
                info!(reason = %rejected, "session creation rejected");
                return RpcOutcome::Error(rejected.message);
            }
        };
        let payload = match serde_json::to_value(&session) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed to encode session");
                return RpcOutcome::error(SESSION_CREATE_FAILED);
            }
        };
        match self.open_session(session) {
            Ok(session) => {
                info!(session_id = %session.id(), "instantiated session");
                RpcOutcome::Value(payload)
            }
            Err(err) => {
                warn!(error = %err, "failed to instantiate session");
                RpcOutcome::error(SESSION_CREATE_FAILED)
            }
        }
    }

    /// Serve a `destroySession` payload.
    pub async fn handle_destroy(&self, input: Value) -> RpcOutcome {
        let session = match self.hooks.destroy_session(input, &self.sessions).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                info!("session to be destroyed not found");
                return RpcOutcome::error(SESSION_NOT_FOUND);
            }
            Err(rejected) => {
                info!(reason = %rejected, "session destruction rejected");
                return RpcOutcome::Error(rejected.message);
            }
        };
        info!(session_id = %session.id(), "destroying session");
        match self.teardown(session.id(), TeardownReason::Destroyed).await {
            TeardownOutcome::Completed => RpcOutcome::Value(Value::Bool(true)),
            TeardownOutcome::NotFound => RpcOutcome::error(SESSION_NOT_FOUND),
            TeardownOutcome::Partial { addresses, .. } => RpcOutcome::error(format!(
                "Session {} could not be fully closed, {addresses} addresses remain.",
                session.id()
            )),
        }
    }

    /// Withdraw a session's addresses, then drop it and stop its monitor.
    ///
    /// Addresses that cannot be withdrawn stay indexed and the session stays
    /// registered; a later teardown retries them.
    pub async fn teardown(&self, session_id: &SessionId, reason: TeardownReason) -> TeardownOutcome {
        match self.withdraw_session(session_id) {
            Withdrawal::NotFound => {
                debug!(session_id = %session_id, %reason, "no session to tear down");
                if reason == TeardownReason::HeartbeatFailed {
                    let _ = self.monitors.lock().remove(session_id);
                }
                TeardownOutcome::NotFound
            }
            Withdrawal::Partial {
                addresses,
                providers,
            } => {
                warn!(
                    session_id = %session_id,
                    %reason,
                    addresses,
                    providers,
                    "session only partially unregistered"
                );
                if reason == TeardownReason::HeartbeatFailed {
                    let _ = self.monitors.lock().remove(session_id);
                }
                TeardownOutcome::Partial {
                    addresses,
                    providers,
                }
            }
            Withdrawal::Complete(session) => {
                match session {
                    Some(session) => self.hooks.cleanup_session(&session).await,
                    None => warn!(session_id = %session_id, "indexed session missing from manager"),
                }
                self.stop_monitor(session_id, reason).await;
                info!(session_id = %session_id, %reason, "session closed");
                TeardownOutcome::Completed
            }
        }
    }

    /// Stop following the connection, withdraw the endpoints and tear down
    /// every session. Returns how many sessions were closed.
    pub async fn shutdown(&self) -> usize {
        let listener = self.listener.lock().take();
        if let Some(id) = listener {
            self.gateway.remove_connection_listener(id);
        }
        self.withdraw_endpoints();
        self.shutdown.cancel();

        let tasks: Vec<_> = self.monitors.lock().drain().map(|(_, h)| h.task).collect();
        if !tasks.is_empty() {
            debug!(count = tasks.len(), "waiting for heartbeat monitors");
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all(tasks)).await.is_err() {
                warn!("heartbeat monitors did not stop within {SHUTDOWN_TIMEOUT:?}");
            }
        }

        let ids: Vec<SessionId> = self.index.lock().providers.keys().cloned().collect();
        let mut closed = 0;
        for id in &ids {
            if self.teardown(id, TeardownReason::Shutdown).await == TeardownOutcome::Completed {
                closed += 1;
            }
        }
        info!(closed, remaining = ids.len() - closed, "session controller shut down");
        closed
    }

    fn open_session(&self, session: Session) -> Result<Arc<Session>, SessionSetupError> {
        let session = Arc::new(session);
        let id = session.id().clone();
        let factories = self.factories.read().clone();

        let mut index = self.index.lock();
        // Checked under the index lock: shutdown cancels before it collects
        // the indexed sessions.
        if self.shutdown.is_cancelled() {
            return Err(SessionSetupError::ShutDown);
        }
        if index.providers.contains_key(&id) || !self.sessions.add(Arc::clone(&session)) {
            return Err(SessionSetupError::Duplicate { session_id: id });
        }

        let mut providers: HashMap<String, Vec<String>> = HashMap::new();
        let mut published = Vec::new();
        for factory in &factories {
            let descriptor = ProviderDescriptor::of(factory.instantiate());
            for method in descriptor.methods() {
                let address = method_address(&descriptor, method, Some(&id));
                let handler = method.handler();
                if let Err(source) = self.gateway.provide(&address, Arc::clone(&handler)) {
                    self.rollback(&mut index, &id, &published);
                    return Err(SessionSetupError::Publish { address, source });
                }
                let _ = index.handlers.insert(address.clone(), handler);
                let addresses = providers
                    .entry(descriptor.interface_name().to_owned())
                    .or_default();
                if !addresses.contains(&address) {
                    addresses.push(address.clone());
                    published.push(address);
                }
            }
        }
        debug!(session_id = %id, addresses = published.len(), "published session providers");
        let _ = index.providers.insert(id.clone(), providers);
        self.spawn_monitor(&id);
        Ok(session)
    }

    fn rollback(&self, index: &mut SessionIndex, session_id: &SessionId, published: &[String]) {
        warn!(session_id = %session_id, count = published.len(), "rolling back session");
        for address in published.iter().rev() {
            if let Err(err) = self.gateway.unprovide(address) {
                error!(address, error = %err, "failed to withdraw address during rollback");
            }
            let _ = index.handlers.remove(address);
        }
        let _ = self.sessions.remove(session_id);
    }

    fn withdraw_session(&self, session_id: &SessionId) -> Withdrawal {
        let mut index = self.index.lock();
        let Some(mut providers) = index.providers.remove(session_id) else {
            return Withdrawal::NotFound;
        };

        let handlers = &mut index.handlers;
        for (provider, addresses) in &mut providers {
            addresses.retain(|address| match self.gateway.unprovide(address) {
                Ok(()) => {
                    let _ = handlers.remove(address);
                    false
                }
                Err(err) => {
                    warn!(session_id = %session_id, address, error = %err, "failed to withdraw session method");
                    true
                }
            });
            if addresses.is_empty() {
                debug!(session_id = %session_id, provider, "session provider withdrawn");
            }
        }
        providers.retain(|_, addresses| !addresses.is_empty());

        if providers.is_empty() {
            return Withdrawal::Complete(self.sessions.remove(session_id));
        }
        let addresses: usize = providers.values().map(Vec::len).sum();
        let count = providers.len();
        let _ = index.providers.insert(session_id.clone(), providers);
        Withdrawal::Partial {
            addresses,
            providers: count,
        }
    }

    fn spawn_monitor(&self, session_id: &SessionId) {
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(monitor_session(
            self.weak_self.clone(),
            Arc::clone(&self.gateway),
            session_id.clone(),
            self.heartbeat,
            cancel.clone(),
        ));
        let previous = self
            .monitors
            .lock()
            .insert(session_id.clone(), HeartbeatHandle { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    async fn stop_monitor(&self, session_id: &SessionId, reason: TeardownReason) {
        let handle = self.monitors.lock().remove(session_id);
        let Some(handle) = handle else {
            return;
        };
        // A failed heartbeat tears down from inside the monitor task itself.
        if reason == TeardownReason::HeartbeatFailed {
            return;
        }
        handle.cancel.cancel();
        if let Err(err) = handle.task.await {
            warn!(session_id = %session_id, error = %err, "heartbeat monitor ended abnormally");
        }
    }

    fn provide_endpoints(&self) {
        for (address, handler) in [
            (CREATE_SESSION_ADDRESS, &self.create_endpoint),
            (DESTROY_SESSION_ADDRESS, &self.destroy_endpoint),
        ] {
            match self.gateway.provide(address, Arc::clone(handler)) {
                Ok(()) => debug!(address, "provided session endpoint"),
                Err(GatewayError::AlreadyProvided { .. }) => {
                    debug!(address, "session endpoint served by another connection");
                }
                Err(err) => warn!(address, error = %err, "failed to provide session endpoint"),
            }
        }
    }

    fn withdraw_endpoints(&self) {
        for address in [CREATE_SESSION_ADDRESS, DESTROY_SESSION_ADDRESS] {
            match self.gateway.unprovide(address) {
                Ok(()) => {}
                Err(GatewayError::NotOwner { .. }) => {
                    debug!(address, "session endpoint owned by another connection");
                }
                Err(err) => warn!(address, error = %err, "failed to withdraw session endpoint"),
            }
        }
    }

    fn republish_sessions(&self) {
        let index = self.index.lock();
        for (address, handler) in &index.handlers {
            if let Err(err) = self.gateway.provide(address, Arc::clone(handler)) {
                warn!(address, error = %err, "failed to republish session method");
            }
        }
        debug!(count = index.handlers.len(), "republished session methods");
    }
}

impl ConnectionListener for SessionLifecycleController {
    fn connection_state_changed(&self, state: ConnectionState) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if state.is_open() {
            self.provide_endpoints();
            self.republish_sessions();
        } else {
            debug!(%state, "connection left open, withdrawing session endpoints");
            self.withdraw_endpoints();
        }
    }
}

impl Drop for SessionLifecycleController {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(id) = self.listener.get_mut().take() {
            self.gateway.remove_connection_listener(id);
        }
    }
}

async fn monitor_session(
    controller: Weak<SessionLifecycleController>,
    gateway: Arc<dyn Gateway>,
    session_id: SessionId,
    config: HeartbeatConfig,
    cancel: CancellationToken,
) {
    match run_heartbeat(gateway, session_id.clone(), config, cancel).await {
        HeartbeatResult::Cancelled => debug!(session_id = %session_id, "heartbeat monitor stopped"),
        HeartbeatResult::Unresponsive => {
            warn!(session_id = %session_id, "session failed to respond to heartbeat, closing session");
            if let Some(controller) = controller.upgrade() {
                let _ = controller
                    .teardown(&session_id, TeardownReason::HeartbeatFailed)
                    .await;
            }
        }
    }
}

struct CreateSessionEndpoint(Weak<SessionLifecycleController>);

#[async_trait]
impl RequestHandler for CreateSessionEndpoint {
    async fn handle(&self, request: RpcRequest) -> RpcOutcome {
        request.ack();
        let Some(controller) = self.0.upgrade() else {
            return RpcOutcome::error(SESSION_CREATE_FAILED);
        };
        let (_, input, _) = request.into_parts();
        controller.handle_create(input).await
    }
}

struct DestroySessionEndpoint(Weak<SessionLifecycleController>);

#[async_trait]
impl RequestHandler for DestroySessionEndpoint {
    async fn handle(&self, request: RpcRequest) -> RpcOutcome {
        request.ack();
        let Some(controller) = self.0.upgrade() else {
            return RpcOutcome::error(SESSION_NOT_FOUND);
        };
        let (_, input, _) = request.into_parts();
        controller.handle_destroy(input).await
    }
}
