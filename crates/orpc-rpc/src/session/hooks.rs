use std::sync::Arc;

use async_trait::async_trait;
use orpc_core::{SessionId, SessionRejected};
use serde_json::Value;
use tracing::debug;

use super::{Session, SessionManager};

/// Policy for creating and destroying sessions.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Build a session from a `createSession` payload, or refuse it.
    async fn create_session(&self, input: Value) -> Result<Session, SessionRejected>;

    /// Resolve a `destroySession` payload to a tracked session. `Ok(None)`
    /// means the payload named no known session.
    async fn destroy_session(
        &self,
        input: Value,
        sessions: &SessionManager,
    ) -> Result<Option<Arc<Session>>, SessionRejected>;

    /// Release whatever the hooks hold for `session` after teardown.
    async fn cleanup_session(&self, session: &Session);
}

/// Accepts every creation request and destroys by id.
///
/// `destroySession` accepts the id as a JSON string or as
/// `{"sessionId": "..."}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSessionHooks;

fn requested_id(input: &Value) -> Option<&str> {
    match input {
        Value::String(id) => Some(id),
        Value::Object(map) => map.get("sessionId").and_then(Value::as_str),
        _ => None,
    }
}

#[async_trait]
impl SessionHooks for DefaultSessionHooks {
    async fn create_session(&self, input: Value) -> Result<Session, SessionRejected> {
        Ok(Session::new(input))
    }

    async fn destroy_session(
        &self,
        input: Value,
        sessions: &SessionManager,
    ) -> Result<Option<Arc<Session>>, SessionRejected> {
        let Some(id) = requested_id(&input) else {
            return Err(SessionRejected::new(
                "destroySession expects a session id or {\"sessionId\": ...}",
            ));
        };
        Ok(sessions.find(&SessionId::from(id)))
    }

    async fn cleanup_session(&self, session: &Session) {
        debug!(session_id = %session.id(), "no session resources to clean up");
    }
}
