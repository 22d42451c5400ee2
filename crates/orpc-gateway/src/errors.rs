//! Gateway error type.

use thiserror::Error;

/// Errors returned by [`crate::Gateway::provide`] and
/// [`crate::Gateway::unprovide`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The connection is not open.
    #[error("gateway connection is not open")]
    NotConnected,

    /// Another connection already provides the address.
    #[error("address '{address}' is already provided by another connection")]
    AlreadyProvided {
        /// The contested address.
        address: String,
    },

    /// The address belongs to another connection and cannot be withdrawn
    /// from here.
    #[error("address '{address}' is not provided by this connection")]
    NotOwner {
        /// The address.
        address: String,
    },

    /// Transport-level failure reported by a gateway implementation.
    #[error("gateway transport error: {0}")]
    Transport(String),
}
