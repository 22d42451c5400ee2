use std::sync::Arc;

use orpc_core::SessionId;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::Session;

/// Registry of live sessions.
pub struct SessionManager {
    sessions: RwLock<Vec<Arc<Session>>>,
}

impl SessionManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
        }
    }

    /// Track `session`. Returns `false` when a session with the same id is
    /// already tracked.
    pub fn add(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.iter().any(|s| s.id() == session.id()) {
            debug!(session_id = %session.id(), "session already tracked");
            return false;
        }
        info!(session_id = %session.id(), "session added");
        sessions.push(session);
        true
    }

    /// Stop tracking a session.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        let index = sessions.iter().position(|s| s.id() == id)?;
        let removed = sessions.remove(index);
        info!(session_id = %id, "session removed");
        Some(removed)
    }

    /// Look up a session.
    pub fn find(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().iter().find(|s| s.id() == id).cloned()
    }

    /// Snapshot of the tracked sessions.
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.read().clone()
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is tracked.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
