//! Error types for registration, session setup and consumer operations.

use orpc_core::SessionId;
use orpc_gateway::GatewayError;
use thiserror::Error;

/// Errors returned by [`crate::ProtoRpcHandler`] and
/// [`crate::GlobalProviderRegistry`] operations.
#[derive(Debug, Error)]
pub enum RpcHandlerError {
    /// Session-scoped providers live and die with their session and cannot
    /// be unregistered globally.
    #[error("provider '{provider}' is session-scoped and must be closed through its session")]
    SessionScopedProvider {
        /// Interface name of the provider.
        provider: String,
    },

    /// `start_session` was called while a session is held.
    #[error("session '{session_id}' is already started")]
    SessionAlreadyStarted {
        /// The held session.
        session_id: SessionId,
    },

    /// A consumer operation needs a session and none is held.
    #[error("no active session")]
    NoActiveSession,

    /// The remote endpoint answered with an error.
    #[error("remote call to '{address}' failed: {message}")]
    Remote {
        /// Address that was called.
        address: String,
        /// Error reported by the remote side.
        message: String,
    },

    /// A payload could not be converted to the expected type.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// The gateway refused a provide/unprovide.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Result type for handler operations.
pub type Result<T> = std::result::Result<T, RpcHandlerError>;

/// Why a session could not be set up after the hooks accepted it.
#[derive(Debug, Error)]
pub enum SessionSetupError {
    /// The hooks produced an id that is already registered.
    #[error("session '{session_id}' already exists")]
    Duplicate {
        /// The clashing id.
        session_id: SessionId,
    },

    /// Publishing a session-scoped address failed; the session was rolled back.
    #[error("failed to publish '{address}': {source}")]
    Publish {
        /// The address that could not be published.
        address: String,
        /// Gateway failure.
        source: GatewayError,
    },

    /// The controller was shut down before the session could be indexed.
    #[error("session controller is shut down")]
    ShutDown,
}
