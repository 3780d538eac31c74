//! Timeout middleware for method invocations.
//!
//! Fails invocations that run longer than their `timeout` with a bus
//! `Timeout` error.

use std::task::{Context, Poll};

use bytes::Bytes;
use idbus_core::{error_names, MethodError};
use tower::{Layer, Service};

use super::Invocation;
use crate::bus::interface::InvokeFuture;

/// Tower layer that enforces each invocation's own deadline.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<Invocation> for TimeoutService<S>
where
    S: Service<Invocation, Response = Bytes, Error = MethodError> + Send,
    S::Future: Send + 'static,
{
    type Response = Bytes;
    type Error = MethodError;
    type Future = InvokeFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let timeout = invocation.timeout;
        let member = format!("{}.{}", invocation.call.interface, invocation.call.member);
        let fut = self.inner.call(invocation);
        Box::pin(async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(MethodError::new(
                    error_names::TIMEOUT,
                    format!("{member} did not complete within {}ms", timeout.as_millis()),
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use idbus_core::decode_body;
    use tower::ServiceExt;

    use super::*;
    use crate::bus::middleware::testing::sleeping_invocation;
    use crate::bus::middleware::InvokeService;

    #[tokio::test]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer.layer(InvokeService);
        let invocation = sleeping_invocation(Duration::from_millis(10), Duration::from_secs(1));
        let body = svc.oneshot(invocation).await.unwrap();
        let reply: String = decode_body(&body).unwrap();
        assert_eq!(reply, "done");
    }

    #[tokio::test]
    async fn exceeds_timeout_returns_error() {
        let svc = TimeoutLayer.layer(InvokeService);
        let invocation = sleeping_invocation(Duration::from_millis(200), Duration::from_millis(50));
        let err = svc.oneshot(invocation).await.unwrap_err();
        assert_eq!(err.name, error_names::TIMEOUT);
        assert!(err.message.contains("org.example.Sleeper.Sleep"));
    }
}
