//! Process-wide provider registration.
//!
//! Every method of a global provider is published under
//! `<Provider>/<method>`. The registry remembers which addresses belong to
//! which provider so they can be withdrawn together, and republishes all of
//! them whenever the gateway reconnects.

use std::collections::HashMap;
use std::sync::Arc;

use orpc_gateway::{ConnectionListener, ConnectionState, Gateway, ListenerId, RequestHandler};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::address::method_address;
use crate::descriptor::{ProviderDescriptor, ProviderFactory, ProviderScope, ServiceProvider};
use crate::errors::{Result, RpcHandlerError};
use crate::lifecycle::SessionLifecycleController;
use crate::listener::WeakListener;

#[derive(Default)]
struct RegistryState {
    /// Provider interface name to its published addresses. A provider is
    /// present only while it has at least one address.
    addresses: HashMap<String, Vec<String>>,
    /// Address to handler, for republishing after a reconnect.
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

/// Publishes global providers and forwards session-scoped ones to the
/// session controller.
pub struct GlobalProviderRegistry {
    gateway: Arc<dyn Gateway>,
    state: Mutex<RegistryState>,
    session_controller: RwLock<Option<Arc<SessionLifecycleController>>>,
    listener: ListenerId,
}

impl GlobalProviderRegistry {
    /// Registry publishing through `gateway`.
    pub fn new(gateway: Arc<dyn Gateway>) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let listener = gateway.add_connection_listener(WeakListener::from_weak(weak.clone()));
            Self {
                gateway,
                state: Mutex::new(RegistryState::default()),
                session_controller: RwLock::new(None),
                listener,
            }
        })
    }

    /// Route session-scoped registrations to `controller`.
    pub fn set_session_controller(&self, controller: Arc<SessionLifecycleController>) {
        *self.session_controller.write() = Some(controller);
    }

    /// Register every provider built by `factories`. Session-scoped
    /// providers are handed to the session controller; the rest are
    /// published now.
    pub fn register(&self, factories: &[ProviderFactory]) -> &Self {
        for factory in factories {
            let provider = factory.instantiate();
            if provider.scope() == ProviderScope::Session {
                let controller = self.session_controller.read().clone();
                match controller {
                    Some(controller) => controller.register(std::slice::from_ref(factory)),
                    None => warn!(
                        provider = provider.interface_name(),
                        "no session controller, dropping session-scoped provider"
                    ),
                }
                continue;
            }
            self.register_provider(provider);
        }
        self
    }

    /// Publish an existing provider instance. Registering a provider name
    /// again replaces its previous addresses.
    pub fn register_provider(&self, provider: Arc<dyn ServiceProvider>) {
        let descriptor = ProviderDescriptor::of(provider);
        let name = descriptor.interface_name().to_owned();

        let mut state = self.state.lock();
        if state.addresses.contains_key(&name) {
            info!(provider = %name, "provider already registered, replacing");
            let _ = self.withdraw(&mut state, &name);
        }

        let open = self.gateway.connection_state().is_open();
        let mut published = state.addresses.remove(&name).unwrap_or_default();
        for method in descriptor.methods() {
            let address = method_address(&descriptor, method, None);
            let handler = method.handler();
            if open {
                if let Err(err) = self.gateway.provide(&address, Arc::clone(&handler)) {
                    warn!(address, error = %err, "failed to publish method");
                }
            }
            let _ = state.handlers.insert(address.clone(), handler);
            if !published.contains(&address) {
                published.push(address);
            }
        }

        info!(provider = %name, methods = published.len(), "registered provider");
        if !published.is_empty() {
            let _ = state.addresses.insert(name, published);
        }
    }

    /// Withdraw every address of `provider`.
    ///
    /// Session-scoped providers cannot be unregistered here. Unknown
    /// providers are skipped.
    pub fn unregister(&self, provider: &dyn ServiceProvider) -> Result<()> {
        let name = provider.interface_name();
        if provider.scope() == ProviderScope::Session {
            error!(provider = name, "session-scoped providers are closed with their session");
            return Err(RpcHandlerError::SessionScopedProvider {
                provider: name.to_owned(),
            });
        }
        let _ = self.unregister_by_name(name);
        Ok(())
    }

    /// Withdraw every address of the provider called `name`. Returns the
    /// number of addresses that could not be withdrawn.
    pub fn unregister_by_name(&self, name: &str) -> usize {
        let mut state = self.state.lock();
        if !state.addresses.contains_key(name) {
            warn!(provider = name, "provider was not registered, skipping");
            return 0;
        }
        let remaining = self.withdraw(&mut state, name);
        if remaining == 0 {
            info!(provider = name, "unregistered provider");
        } else {
            warn!(provider = name, remaining, "provider only partially unregistered");
        }
        remaining
    }

    /// Withdraw every global provider. Returns the number of addresses that
    /// could not be withdrawn.
    pub fn unregister_all(&self) -> usize {
        let names: Vec<String> = self.state.lock().addresses.keys().cloned().collect();
        names.iter().map(|name| self.unregister_by_name(name)).sum()
    }

    /// Provider name to published addresses.
    pub fn list_provided_methods(&self) -> HashMap<String, Vec<String>> {
        self.state.lock().addresses.clone()
    }

    /// Whether a provider called `name` holds addresses.
    pub fn is_registered(&self, name: &str) -> bool {
        self.state.lock().addresses.contains_key(name)
    }

    /// Withdraw `name`'s addresses, keeping the ones that failed. Returns
    /// how many are left.
    fn withdraw(&self, state: &mut RegistryState, name: &str) -> usize {
        let Some(addresses) = state.addresses.remove(name) else {
            return 0;
        };
        let mut remaining = Vec::new();
        for address in addresses {
            match self.gateway.unprovide(&address) {
                Ok(()) => {
                    debug!(address, "withdrew method");
                    let _ = state.handlers.remove(&address);
                }
                Err(err) => {
                    warn!(address, error = %err, "failed to withdraw method");
                    remaining.push(address);
                }
            }
        }
        let count = remaining.len();
        if count > 0 {
            let _ = state.addresses.insert(name.to_owned(), remaining);
        }
        count
    }

    fn republish(&self) {
        let state = self.state.lock();
        for (address, handler) in &state.handlers {
            if let Err(err) = self.gateway.provide(address, Arc::clone(handler)) {
                warn!(address, error = %err, "failed to republish method");
            }
        }
        debug!(count = state.handlers.len(), "republished global methods");
    }
}

impl ConnectionListener for GlobalProviderRegistry {
    fn connection_state_changed(&self, state: ConnectionState) {
        if state.is_open() {
            self.republish();
        }
    }
}

impl Drop for GlobalProviderRegistry {
    fn drop(&mut self) {
        self.gateway.remove_connection_listener(self.listener);
    }
}
