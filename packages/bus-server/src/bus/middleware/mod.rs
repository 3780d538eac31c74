//! Tower middleware around method invocation.
//!
//! - [`timeout`]: per-invocation deadline
//! - [`metrics`]: `bus_call` span, counters and duration histogram
//! - [`pipeline`]: composes the layers over [`InvokeService`]

pub mod metrics;
pub mod pipeline;
pub mod timeout;

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use idbus_core::MethodError;
use tower::Service;

use super::interface::{CallContext, InstanceData, InvokeFuture, Invoker};

pub use metrics::MetricsLayer;
pub use pipeline::build_invoke_pipeline;
pub use timeout::TimeoutLayer;

/// A resolved method call, ready to hand to its invoker.
pub struct Invocation {
    pub call: CallContext,
    pub instance: InstanceData,
    pub invoker: Arc<dyn Invoker>,
    pub body: Bytes,
    pub timeout: Duration,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("call", &self.call)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Innermost service: runs the invoker.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeService;

impl Service<Invocation> for InvokeService {
    type Response = Bytes;
    type Error = MethodError;
    type Future = InvokeFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let Invocation {
            call,
            instance,
            invoker,
            body,
            ..
        } = invocation;
        invoker.invoke(call, instance, body)
    }
}
