//! Session lifecycle end to end: two facades sharing an in-process broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use orpc_core::{MethodError, SessionId, SessionRejected};
use orpc_gateway::{ConnectionState, Gateway, MemoryBroker, MemoryClient};
use orpc_rpc::constants::{CREATE_SESSION_ADDRESS, DESTROY_SESSION_ADDRESS, SESSION_NOT_FOUND};
use orpc_rpc::{
    CallbackProvider, DefaultSessionHooks, HeartbeatConfig, MethodDescriptor, ProtoRpcHandler,
    ProviderFactory, ProviderScope, RpcHandlerError, ServiceProvider, Session,
    SessionHooks, SessionLifecycleController, SessionManager, TeardownOutcome, TeardownReason,
};
use serde_json::{Value, json};
use tokio::time;

const INTERVAL: Duration = Duration::from_secs(1);
const TIMEOUT: Duration = Duration::from_millis(400);

/// Counts calls per instance, so separate sessions must not share counts.
#[derive(Default)]
struct Tally {
    count: AtomicUsize,
}

impl ServiceProvider for Tally {
    fn interface_name(&self) -> &str {
        "Tally"
    }

    fn scope(&self) -> ProviderScope {
        ProviderScope::Session
    }

    fn methods(self: Arc<Self>) -> Vec<MethodDescriptor> {
        vec![MethodDescriptor::bound(&self, "bump", |this: Arc<Self>, ()| async move {
            Ok::<_, MethodError>(this.count.fetch_add(1, Ordering::SeqCst) + 1)
        })]
    }
}

#[derive(Default)]
struct Greeter;

impl ServiceProvider for Greeter {
    fn interface_name(&self) -> &str {
        "Greeter"
    }

    fn methods(self: Arc<Self>) -> Vec<MethodDescriptor> {
        vec![MethodDescriptor::indirect("hello", |name: String| async move {
            Ok::<_, MethodError>(format!("hello {name}"))
        })]
    }
}

struct Inbox {
    received: AtomicUsize,
}

impl CallbackProvider for Inbox {
    fn methods(self: Arc<Self>, _session: &Session) -> Vec<MethodDescriptor> {
        vec![MethodDescriptor::bound(&self, "deliver", |this: Arc<Self>, _: Value| async move {
            let _ = this.received.fetch_add(1, Ordering::SeqCst);
            Ok::<_, MethodError>(true)
        })]
    }
}

/// Accepts sessions only with the right token.
struct TokenHooks;

#[async_trait]
impl SessionHooks for TokenHooks {
    async fn create_session(&self, input: Value) -> Result<Session, SessionRejected> {
        match input.get("token").and_then(Value::as_str) {
            Some("open-sesame") => Ok(Session::new(input)),
            _ => Err(SessionRejected::new("Invalid session token.")),
        }
    }

    async fn destroy_session(
        &self,
        input: Value,
        sessions: &SessionManager,
    ) -> Result<Option<Arc<Session>>, SessionRejected> {
        DefaultSessionHooks.destroy_session(input, sessions).await
    }

    async fn cleanup_session(&self, _session: &Session) {}
}

fn heartbeat() -> HeartbeatConfig {
    HeartbeatConfig {
        interval: INTERVAL,
        timeout: TIMEOUT,
    }
}

fn controller_on(
    gateway: Arc<MemoryClient>,
    hooks: Arc<dyn SessionHooks>,
) -> Arc<SessionLifecycleController> {
    SessionLifecycleController::new(gateway, Arc::new(SessionManager::new()), hooks, heartbeat())
}

struct Fixture {
    broker: Arc<MemoryBroker>,
    server_gw: Arc<MemoryClient>,
    server: ProtoRpcHandler,
    client_gw: Arc<MemoryClient>,
    client: ProtoRpcHandler,
}

fn fixture() -> Fixture {
    let broker = MemoryBroker::new();
    let server_gw = broker.connect();
    let server = ProtoRpcHandler::new(
        server_gw.clone(),
        controller_on(server_gw.clone(), Arc::new(DefaultSessionHooks)),
    );
    let _ = server.register(&[ProviderFactory::of::<Tally>(), ProviderFactory::of::<Greeter>()]);

    let client_gw = broker.connect();
    let client = ProtoRpcHandler::new(
        client_gw.clone(),
        controller_on(client_gw.clone(), Arc::new(DefaultSessionHooks)),
    );
    Fixture {
        broker,
        server_gw,
        server,
        client_gw,
        client,
    }
}

#[tokio::test(start_paused = true)]
async fn create_and_destroy_over_the_wire() {
    let f = fixture();
    let raw = f.broker.connect();

    let created = raw.make(CREATE_SESSION_ADDRESS, Value::Null).await;
    let session: Session = serde_json::from_value(created.data().cloned().unwrap()).unwrap();
    assert!(!session.id().as_str().is_empty());
    let sessions = f.server.session_controller().sessions().clone();
    assert!(sessions.find(session.id()).is_some());

    let destroyed = raw
        .make(DESTROY_SESSION_ADDRESS, json!(session.id().as_str()))
        .await;
    assert_eq!(destroyed.data(), Some(&json!(true)));
    assert!(sessions.find(session.id()).is_none());
    assert!(!f.broker.is_provided(&format!("{}/Tally/bump", session.id())));
}

#[tokio::test(start_paused = true)]
async fn destroying_an_unknown_session_is_an_error() {
    let f = fixture();
    let raw = f.broker.connect();
    let result = raw.make(DESTROY_SESSION_ADDRESS, json!("no-such-session")).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some(SESSION_NOT_FOUND));
}

#[tokio::test(start_paused = true)]
async fn each_session_gets_its_own_provider_instance() {
    let f = fixture();
    let session = f.client.start_session(Vec::new()).await.unwrap();

    let other = f.broker.connect();
    let other_handler = ProtoRpcHandler::new(
        other.clone(),
        controller_on(other.clone(), Arc::new(DefaultSessionHooks)),
    );
    let other_session = other_handler.start_session(Vec::new()).await.unwrap();

    let bump = |id: &SessionId| format!("{id}/Tally/bump");
    let _ = f.client_gw.make(&bump(session.id()), Value::Null).await;
    let second = f.client_gw.make(&bump(session.id()), Value::Null).await;
    let first_other = other.make(&bump(other_session.id()), Value::Null).await;

    assert_eq!(second.data(), Some(&json!(2)));
    assert_eq!(first_other.data(), Some(&json!(1)));
    assert_eq!(f.server.session_controller().list_provided_methods().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn responsive_consumer_keeps_its_session() {
    let f = fixture();
    let session = f.client.start_session(Vec::new()).await.unwrap();

    time::sleep(INTERVAL * 5 + INTERVAL / 2).await;
    let controller = f.server.session_controller();
    assert!(controller.sessions().find(session.id()).is_some());
    assert!(controller.is_monitored(session.id()));

    assert!(f.client.close_session().await.unwrap());
    assert!(controller.sessions().is_empty());
    assert!(!controller.is_monitored(session.id()));
}

#[tokio::test(start_paused = true)]
async fn disconnected_consumer_is_reclaimed() {
    let f = fixture();
    let session = f.client.start_session(Vec::new()).await.unwrap();
    let controller = f.server.session_controller();

    f.client_gw.set_connection_state(ConnectionState::Closed);
    time::sleep(INTERVAL + TIMEOUT + Duration::from_millis(100)).await;

    assert!(controller.sessions().find(session.id()).is_none());
    assert!(controller.session_addresses(session.id()).is_empty());
    assert!(!f.broker.is_provided(&format!("{}/Tally/bump", session.id())));
    assert_eq!(
        controller.teardown(session.id(), TeardownReason::Destroyed).await,
        TeardownOutcome::NotFound
    );
}

#[tokio::test(start_paused = true)]
async fn consumer_recovers_after_session_was_reclaimed() {
    let f = fixture();
    let session = f.client.start_session(Vec::new()).await.unwrap();
    let heartbeat = session.method_path("heartbeat");

    f.client_gw.set_connection_state(ConnectionState::Reconnecting);
    time::sleep(INTERVAL + TIMEOUT + Duration::from_millis(200)).await;
    f.client_gw.set_connection_state(ConnectionState::Open);
    assert!(f.server.session_controller().sessions().is_empty());

    assert!(!f.client.close_session().await.unwrap());
    assert!(f.client.session().is_none());
    assert!(!f.broker.is_provided(&heartbeat));

    let fresh = f.client.start_session(Vec::new()).await.unwrap();
    assert_ne!(fresh.id(), session.id());
    assert!(f.server.session_controller().sessions().find(fresh.id()).is_some());
}

#[tokio::test(start_paused = true)]
async fn callbacks_are_reachable_from_the_server() {
    let f = fixture();
    let inbox = Arc::new(Inbox {
        received: AtomicUsize::new(0),
    });
    let session = f.client.start_session(vec![inbox.clone()]).await.unwrap();

    let reply = f
        .server_gw
        .make(&session.method_path("deliver"), json!({"subject": "hi"}))
        .await;
    assert_eq!(reply.data(), Some(&json!(true)));
    assert_eq!(inbox.received.load(Ordering::SeqCst), 1);

    let heartbeat = f
        .server_gw
        .make(&session.method_path("heartbeat"), json!(session.id().as_str()))
        .await;
    assert_eq!(heartbeat.data(), Some(&json!(session.id().as_str())));
}

#[tokio::test(start_paused = true)]
async fn server_reconnect_republishes_everything() {
    let f = fixture();
    let session = f.client.start_session(Vec::new()).await.unwrap();
    let bump = format!("{}/Tally/bump", session.id());

    f.server_gw.set_connection_state(ConnectionState::Reconnecting);
    assert!(!f.broker.is_provided("Greeter/hello"));
    assert!(!f.broker.is_provided(&bump));

    f.server_gw.set_connection_state(ConnectionState::Open);
    assert!(f.broker.is_provided("Greeter/hello"));
    assert!(f.broker.is_provided(&bump));
    assert!(f.broker.is_provided(CREATE_SESSION_ADDRESS));
    assert!(f.broker.is_provided(DESTROY_SESSION_ADDRESS));

    let hello = f.client_gw.make("Greeter/hello", json!("ada")).await;
    assert_eq!(hello.data(), Some(&json!("hello ada")));
}

#[tokio::test(start_paused = true)]
async fn client_reconnect_republishes_callbacks() {
    let f = fixture();
    let session = f.client.start_session(Vec::new()).await.unwrap();
    let heartbeat = session.method_path("heartbeat");

    f.client_gw.set_connection_state(ConnectionState::Reconnecting);
    assert!(!f.broker.is_provided(&heartbeat));
    f.client_gw.set_connection_state(ConnectionState::Open);
    assert!(f.broker.is_provided(&heartbeat));

    time::sleep(INTERVAL * 3).await;
    assert!(f.server.session_controller().sessions().find(session.id()).is_some());
}

#[tokio::test(start_paused = true)]
async fn hooks_can_refuse_sessions() {
    let broker = MemoryBroker::new();
    let server_gw = broker.connect();
    let _server = ProtoRpcHandler::new(server_gw.clone(), controller_on(server_gw, Arc::new(TokenHooks)));

    let client_gw = broker.connect();
    let client = ProtoRpcHandler::new(
        client_gw.clone(),
        controller_on(client_gw, Arc::new(DefaultSessionHooks)),
    );

    let refused = client.start_session(Vec::new()).await.unwrap_err();
    assert!(
        matches!(&refused, RpcHandlerError::Remote { message, .. } if message == "Invalid session token.")
    );
    assert!(client.session().is_none());

    let session = client
        .start_session_with(json!({"token": "open-sesame"}), Vec::new())
        .await
        .unwrap();
    assert_eq!(session.request_data()["token"], json!("open-sesame"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_nothing_published() {
    let f = fixture();
    let _ = f.client.start_session(Vec::new()).await.unwrap();

    f.server.shutdown().await;
    f.client.shutdown().await;
    assert!(f.broker.addresses().is_empty());
    assert!(f.server.session_controller().sessions().is_empty());
}
