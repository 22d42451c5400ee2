//! Consumer-side callbacks: methods a session holder publishes for the
//! server to call back.

use std::sync::Arc;

use orpc_core::MethodError;
use serde_json::Value;

use crate::constants::HEARTBEAT_ADDRESS;
use crate::descriptor::MethodDescriptor;
use crate::session::Session;

/// Methods published under `<sessionId>/<method>` for the held session.
pub trait CallbackProvider: Send + Sync + 'static {
    /// The callback's methods for `session`.
    fn methods(self: Arc<Self>, session: &Session) -> Vec<MethodDescriptor>;
}

/// Answers the server's heartbeat probe with the local session id.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeartbeatResponder;

impl CallbackProvider for HeartbeatResponder {
    fn methods(self: Arc<Self>, session: &Session) -> Vec<MethodDescriptor> {
        let session_id = session.id().clone();
        vec![MethodDescriptor::indirect(HEARTBEAT_ADDRESS, move |_probe: Value| {
            let session_id = session_id.clone();
            async move { Ok::<_, MethodError>(session_id) }
        })]
    }
}
