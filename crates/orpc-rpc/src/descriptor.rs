//! Provider and method descriptors.
//!
//! A [`ServiceProvider`] lists its methods as [`MethodDescriptor`]s; the
//! registry and the session controller turn those into published addresses
//! through [`crate::address`]. Dispatch goes straight to the handler stored
//! in each descriptor, so methods with the same name on different providers
//! never shadow each other.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use orpc_core::MethodError;
use orpc_gateway::{Acknowledger, RequestHandler, RpcOutcome};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::invoker::{DirectHandler, IndirectHandler};

/// Whether a provider is process-wide or instantiated per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderScope {
    /// Published once under `<Provider>/<method>`.
    Global,
    /// Instantiated per session under `<sessionId>/<Provider>/<method>`.
    Session,
}

/// How a method participates in the two-phase response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// The request is acknowledged on receipt and the method's result
    /// becomes the response.
    Indirect,
    /// The method receives the acknowledger and decides itself whether to
    /// accept, reject or answer.
    Direct,
}

/// One callable method of a provider.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    rpc_name: Option<String>,
    input_type: &'static str,
    kind: HandlerKind,
    handler: Arc<dyn RequestHandler>,
}

impl MethodDescriptor {
    /// An acknowledge-then-answer method. The payload is decoded into `I`;
    /// `Ok` becomes the response value, [`MethodError::Busy`] a rejection
    /// and [`MethodError::Failed`] an error.
    pub fn indirect<I, O, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, MethodError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            rpc_name: None,
            input_type: std::any::type_name::<I>(),
            kind: HandlerKind::Indirect,
            handler: Arc::new(IndirectHandler::new(f)),
        }
    }

    /// Like [`MethodDescriptor::indirect`], with `provider` passed to every
    /// call.
    pub fn bound<P, I, O, F, Fut>(provider: &Arc<P>, name: impl Into<String>, f: F) -> Self
    where
        P: Send + Sync + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(Arc<P>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, MethodError>> + Send + 'static,
    {
        let provider = Arc::clone(provider);
        Self::indirect(name, move |input| f(Arc::clone(&provider), input))
    }

    /// A method that owns the acknowledgement. It must call
    /// [`Acknowledger::ack`] before returning a value or error, or return
    /// [`RpcOutcome::Rejected`] without acknowledging.
    pub fn direct<I, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(I, Acknowledger) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcOutcome> + Send + 'static,
    {
        Self {
            name: name.into(),
            rpc_name: None,
            input_type: std::any::type_name::<I>(),
            kind: HandlerKind::Direct,
            handler: Arc::new(DirectHandler::new(f)),
        }
    }

    /// Publish under `rpc_name` instead of the method name. An empty name
    /// keeps the method name.
    #[must_use]
    pub fn with_rpc_name(mut self, rpc_name: impl Into<String>) -> Self {
        self.rpc_name = Some(rpc_name.into());
        self
    }

    /// The method's own name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last address segment: the rename override when set and non-empty,
    /// the method name otherwise.
    pub fn rpc_name(&self) -> &str {
        match self.rpc_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.name,
        }
    }

    /// Type name of the decoded input.
    pub fn input_type(&self) -> &'static str {
        self.input_type
    }

    /// Acknowledgement mode.
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// Handler published under this method's address.
    pub fn handler(&self) -> Arc<dyn RequestHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("rpc_name", &self.rpc_name)
            .field("input_type", &self.input_type)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Something that exposes methods over RPC.
pub trait ServiceProvider: Send + Sync + 'static {
    /// Interface name; first provider segment of every address.
    fn interface_name(&self) -> &str;

    /// Lifetime of the provider.
    fn scope(&self) -> ProviderScope {
        ProviderScope::Global
    }

    /// The provider's methods, each bound to this instance.
    fn methods(self: Arc<Self>) -> Vec<MethodDescriptor>;
}

/// A provider instance together with its method table.
#[derive(Clone, Debug)]
pub struct ProviderDescriptor {
    interface_name: String,
    scope: ProviderScope,
    methods: Vec<MethodDescriptor>,
}

impl ProviderDescriptor {
    /// Describe `provider`.
    pub fn of(provider: Arc<dyn ServiceProvider>) -> Self {
        Self {
            interface_name: provider.interface_name().to_owned(),
            scope: provider.scope(),
            methods: provider.methods(),
        }
    }

    /// Interface name.
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// Provider lifetime.
    pub fn scope(&self) -> ProviderScope {
        self.scope
    }

    /// Method table.
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }
}

/// Creates fresh provider instances; session-scoped providers get one
/// instance per session.
#[derive(Clone)]
pub struct ProviderFactory {
    make: Arc<dyn Fn() -> Arc<dyn ServiceProvider> + Send + Sync>,
}

impl ProviderFactory {
    /// Factory calling `make` for every instance.
    pub fn new<P, F>(make: F) -> Self
    where
        P: ServiceProvider,
        F: Fn() -> P + Send + Sync + 'static,
    {
        Self {
            make: Arc::new(move || Arc::new(make()) as Arc<dyn ServiceProvider>),
        }
    }

    /// Factory for a default-constructible provider.
    pub fn of<P: ServiceProvider + Default>() -> Self {
        Self::new(P::default)
    }

    /// Create a new instance.
    pub fn instantiate(&self) -> Arc<dyn ServiceProvider> {
        (self.make)()
    }
}

impl fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderFactory").finish_non_exhaustive()
    }
}
