//! # orpc-rpc
//!
//! Typed, session-aware RPC on top of a pub/sub + RPC broker.
//!
//! - [`address`]: how providers, methods and sessions map onto addresses
//! - [`GlobalProviderRegistry`]: publishes process-wide providers and
//!   republishes them after a reconnect
//! - [`SessionLifecycleController`]: `createSession` / `destroySession`,
//!   per-session provider instances, heartbeat-driven teardown
//! - [`ProtoRpcHandler`]: the facade applications talk to, on both the
//!   serving and the consuming side

#![deny(unsafe_code)]

pub mod address;
pub mod callbacks;
pub mod constants;
pub mod descriptor;
pub mod errors;
pub mod handler;
pub mod heartbeat;
pub mod lifecycle;
pub mod registry;
pub mod session;

mod invoker;
mod listener;
#[cfg(test)]
mod testing;

pub use callbacks::{CallbackProvider, HeartbeatResponder};
pub use descriptor::{
    HandlerKind, MethodDescriptor, ProviderDescriptor, ProviderFactory, ProviderScope,
    ServiceProvider,
};
pub use errors::{Result, RpcHandlerError, SessionSetupError};
pub use handler::ProtoRpcHandler;
pub use heartbeat::{HeartbeatConfig, HeartbeatResult};
pub use lifecycle::{SessionLifecycleController, TeardownOutcome, TeardownReason};
pub use registry::GlobalProviderRegistry;
pub use session::{DefaultSessionHooks, Session, SessionHooks, SessionManager};
