//! Request handlers that adapt typed provider methods to the broker's
//! untyped request/outcome contract.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use orpc_core::MethodError;
use orpc_gateway::{Acknowledger, RequestHandler, RpcOutcome, RpcRequest};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

/// Decode a request payload. A missing payload decodes as JSON `null`, so
/// `()` and `Option<T>` inputs accept calls without data.
fn decode<I: DeserializeOwned>(address: &str, data: Value) -> Result<I, RpcOutcome> {
    serde_json::from_value(data).map_err(|err| {
        warn!(address, error = %err, "request payload does not match method input");
        RpcOutcome::error(format!("invalid input for {address}: {err}"))
    })
}

fn panicked(address: &str) -> RpcOutcome {
    error!(address, "method panicked");
    RpcOutcome::error(format!("method {address} panicked"))
}

/// Acknowledges on receipt, then runs the method and maps its result.
pub(crate) struct IndirectHandler<I, O, F> {
    f: F,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, F> IndirectHandler<I, O, F> {
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<I, O, F, Fut> RequestHandler for IndirectHandler<I, O, F>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, MethodError>> + Send + 'static,
{
    async fn handle(&self, request: RpcRequest) -> RpcOutcome {
        request.ack();
        let (address, data, _) = request.into_parts();
        let input = match decode::<I>(&address, data) {
            Ok(input) => input,
            Err(outcome) => return outcome,
        };

        let Ok(result) = AssertUnwindSafe((self.f)(input)).catch_unwind().await else {
            return panicked(&address);
        };
        match result {
            Ok(output) => match serde_json::to_value(output) {
                Ok(value) => RpcOutcome::Value(value),
                Err(err) => {
                    warn!(address, error = %err, "failed to encode method output");
                    RpcOutcome::error(format!("failed to encode output of {address}: {err}"))
                }
            },
            Err(MethodError::Busy) => {
                debug!(address, "provider busy, rejecting request");
                RpcOutcome::Rejected
            }
            Err(MethodError::Failed { message }) => {
                warn!(address, error = %message, "method failed");
                RpcOutcome::Error(message)
            }
        }
    }
}

/// Hands the acknowledger to the method, which owns the whole response.
pub(crate) struct DirectHandler<I, F> {
    f: F,
    _input: PhantomData<fn(I)>,
}

impl<I, F> DirectHandler<I, F> {
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _input: PhantomData,
        }
    }
}

#[async_trait]
impl<I, F, Fut> RequestHandler for DirectHandler<I, F>
where
    I: DeserializeOwned + Send + 'static,
    F: Fn(I, Acknowledger) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcOutcome> + Send + 'static,
{
    async fn handle(&self, request: RpcRequest) -> RpcOutcome {
        let (address, data, ack) = request.into_parts();
        let input = match decode::<I>(&address, data) {
            Ok(input) => input,
            Err(outcome) => {
                ack.ack();
                return outcome;
            }
        };
        match AssertUnwindSafe((self.f)(input, ack)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => panicked(&address),
        }
    }
}
