//! # orpc-core
//!
//! Foundation types shared by every orpc crate:
//!
//! - **Branded IDs**: [`SessionId`] as a newtype for type safety
//! - **Errors**: [`MethodError`] for provider methods, [`SessionRejected`] for
//!   refused session requests
//! - **Logging**: `tracing` subscriber setup and in-memory log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::{MethodError, SessionRejected};
pub use ids::SessionId;
