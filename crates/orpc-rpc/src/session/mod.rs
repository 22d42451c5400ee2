//! Server-side session records, their registry and the hooks that decide
//! how sessions are created and destroyed.

mod hooks;
mod manager;

pub use hooks::{DefaultSessionHooks, SessionHooks};
pub use manager::SessionManager;

use orpc_core::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::SEPARATOR;

/// A session shared between a server and one consumer.
///
/// Serialized as `{"sessionUuid": "...", "requestData": ...}`, the payload
/// returned by `createSession`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    session_uuid: SessionId,
    #[serde(default)]
    request_data: Value,
}

impl Session {
    /// A session with a fresh id carrying the creation request's payload.
    pub fn new(request_data: Value) -> Self {
        Self::with_id(SessionId::new(), request_data)
    }

    /// A session with a caller-chosen id.
    pub fn with_id(session_uuid: SessionId, request_data: Value) -> Self {
        Self {
            session_uuid,
            request_data,
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.session_uuid
    }

    /// Payload of the creation request.
    pub fn request_data(&self) -> &Value {
        &self.request_data
    }

    /// `<sessionId>/<address>`.
    pub fn method_path(&self, address: &str) -> String {
        format!("{}{SEPARATOR}{address}", self.session_uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape() {
        let session = Session::with_id(SessionId::from("abc"), json!({"token": "t"}));
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value, json!({"sessionUuid": "abc", "requestData": {"token": "t"}}));
    }

    #[test]
    fn missing_request_data_decodes_as_null() {
        let session: Session = serde_json::from_value(json!({"sessionUuid": "abc"})).unwrap();
        assert_eq!(session.id().as_str(), "abc");
        assert!(session.request_data().is_null());
    }

    #[test]
    fn new_sessions_have_distinct_ids() {
        let a = Session::new(Value::Null);
        let b = Session::new(Value::Null);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn method_path_prefixes_session_id() {
        let session = Session::with_id(SessionId::from("s1"), Value::Null);
        assert_eq!(session.method_path("heartbeat"), "s1/heartbeat");
    }
}
