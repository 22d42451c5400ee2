//! Providers served by the demo.

use std::sync::Arc;

use orpc_core::MethodError;
use orpc_rpc::{MethodDescriptor, ProviderScope, ServiceProvider};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Payload of `Echo/echo`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EchoMessage {
    /// Text to echo.
    pub msg: String,
}

/// Global provider answering with its input.
#[derive(Default)]
pub struct Echo;

impl ServiceProvider for Echo {
    fn interface_name(&self) -> &str {
        "Echo"
    }

    fn methods(self: Arc<Self>) -> Vec<MethodDescriptor> {
        vec![MethodDescriptor::indirect("echo", |m: EchoMessage| async move {
            if m.msg.is_empty() {
                return Err(MethodError::failed("empty message"));
            }
            Ok(m)
        })]
    }
}

/// Per-session list of notes.
#[derive(Default)]
pub struct Notepad {
    notes: Mutex<Vec<String>>,
}

impl ServiceProvider for Notepad {
    fn interface_name(&self) -> &str {
        "Notepad"
    }

    fn scope(&self) -> ProviderScope {
        ProviderScope::Session
    }

    fn methods(self: Arc<Self>) -> Vec<MethodDescriptor> {
        vec![
            MethodDescriptor::bound(&self, "append", |this: Arc<Self>, note: String| async move {
                let mut notes = this.notes.lock();
                notes.push(note);
                Ok::<_, MethodError>(notes.len())
            }),
            MethodDescriptor::bound(&self, "list", |this: Arc<Self>, ()| async move {
                Ok::<_, MethodError>(this.notes.lock().clone())
            }),
        ]
    }
}
