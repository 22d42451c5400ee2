//! # orpc-gateway
//!
//! The messaging-gateway collaborator that orpc sits on top of.
//!
//! - [`Gateway`]: provide/unprovide/make plus connection-state listeners,
//!   the only surface the session and registration layers depend on
//! - [`RpcRequest`] / [`RpcOutcome`]: one request in, one outcome out, with
//!   the ack-before-value contract carried by the request's [`Acknowledger`]
//! - [`MemoryBroker`]: an in-process broker whose [`MemoryClient`]
//!   connections implement [`Gateway`], used by tests and by embedders that
//!   host both ends of a session in one process

#![deny(unsafe_code)]

pub mod errors;
pub mod gateway;
pub mod memory;
pub mod types;

pub use errors::GatewayError;
pub use gateway::{ConnectionListener, Gateway, ListenerId, RequestHandler};
pub use memory::{MemoryBroker, MemoryClient, MemoryConfig};
pub use types::{
    Acknowledger, CONNECTION_CLOSED, ConnectionState, NO_RPC_PROVIDER, RESPONSE_TIMEOUT,
    RpcOutcome, RpcRequest, RpcResult,
};
