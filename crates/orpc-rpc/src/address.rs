//! Address routing: how providers, methods and sessions map onto broker
//! addresses.
//!
//! - global method: `<ProviderInterfaceName>/<methodName>`
//! - session method: `<sessionId>/<ProviderInterfaceName>/<methodName>`
//! - consumer callback: `<sessionId>/<methodName>`
//!
//! The same functions are used to publish and to withdraw, so an address
//! computed at registration is always the one removed later.

use orpc_core::SessionId;

use crate::descriptor::{MethodDescriptor, ProviderDescriptor};

/// Segment separator.
pub const SEPARATOR: char = '/';

/// Address of a method of a global provider.
pub fn global_address(provider: &str, method: &str) -> String {
    format!("{provider}{SEPARATOR}{method}")
}

/// Address of a method of a session-scoped provider.
pub fn session_address(session_id: &SessionId, provider: &str, method: &str) -> String {
    format!("{session_id}{SEPARATOR}{provider}{SEPARATOR}{method}")
}

/// Address of a consumer-held callback method.
pub fn callback_address(session_id: &SessionId, method: &str) -> String {
    format!("{session_id}{SEPARATOR}{method}")
}

/// Address of `method` of `provider`, session-qualified when `session_id`
/// is given.
pub fn method_address(
    provider: &ProviderDescriptor,
    method: &MethodDescriptor,
    session_id: Option<&SessionId>,
) -> String {
    match session_id {
        Some(id) => session_address(id, provider.interface_name(), method.rpc_name()),
        None => global_address(provider.interface_name(), method.rpc_name()),
    }
}

/// Segments of a parsed address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Session id for three-segment addresses.
    pub session_id: Option<SessionId>,
    /// Provider interface name (for callback addresses: the session id).
    pub provider: String,
    /// Method name.
    pub method: String,
}

/// Split an address back into its segments.
///
/// Two-segment addresses parse as global; a callback address therefore
/// reports its session id as `provider`. Empty segments and more than three
/// segments are rejected.
pub fn parse(address: &str) -> Option<ParsedAddress> {
    let parts: Vec<&str> = address.split(SEPARATOR).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    match parts.as_slice() {
        [provider, method] => Some(ParsedAddress {
            session_id: None,
            provider: (*provider).to_owned(),
            method: (*method).to_owned(),
        }),
        [session, provider, method] => Some(ParsedAddress {
            session_id: Some(SessionId::from(*session)),
            provider: (*provider).to_owned(),
            method: (*method).to_owned(),
        }),
        _ => None,
    }
}
