//! Error types raised by provider methods and session hooks.
//!
//! Both types are local, recoverable conditions. Neither is ever fatal to
//! the process: the RPC layer turns them into replies for the caller.

use thiserror::Error;

/// Failure raised by a provider method implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MethodError {
    /// The method cannot serve the request right now. The caller should
    /// retry or reroute; the broker sees a rejection, not an error.
    #[error("provider is busy")]
    Busy,

    /// Any other failure while running the method.
    #[error("{message}")]
    Failed {
        /// Human-readable reason forwarded to the caller.
        message: String,
    },
}

impl MethodError {
    /// Shorthand for [`MethodError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Whether the caller may retry against another provider.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// A session creation or destruction request was refused by the session
/// hooks (for example a mismatched token).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SessionRejected {
    /// Reason sent back to the caller.
    pub message: String,
}

impl SessionRejected {
    /// Build a rejection with the given reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
