//! Connection listener adapter that does not keep its target alive.

use std::sync::{Arc, Weak};

use orpc_gateway::{ConnectionListener, ConnectionState};

/// Forwards state changes to a weakly held listener. Registering this
/// instead of the listener itself avoids a gateway -> listener -> gateway
/// cycle.
pub(crate) struct WeakListener<T>(Weak<T>);

impl<T> WeakListener<T> {
    pub(crate) fn new(target: &Arc<T>) -> Arc<Self> {
        Arc::new(Self(Arc::downgrade(target)))
    }

    pub(crate) fn from_weak(target: Weak<T>) -> Arc<Self> {
        Arc::new(Self(target))
    }
}

impl<T: ConnectionListener + 'static> ConnectionListener for WeakListener<T> {
    fn connection_state_changed(&self, state: ConnectionState) {
        if let Some(target) = self.0.upgrade() {
            target.connection_state_changed(state);
        }
    }
}
