//! Metrics middleware for method invocations.
//!
//! Each invocation runs inside a `bus_call` span that records its duration and
//! outcome. Counts and durations also go to the `metrics` facade.

use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use idbus_core::MethodError;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::Invocation;
use crate::bus::interface::InvokeFuture;

/// Tower layer that instruments invocations.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Invocation> for MetricsService<S>
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
        let interface = invocation.call.interface.clone();
        let member = invocation.call.member.clone();
        let request_id = invocation.call.request_id;

        let span = info_span!(
            "bus_call",
            request_id = request_id,
            path = %invocation.call.path,
            interface = %interface,
            member = %member,
            uid = invocation.call.caller.uid,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(invocation);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(_) => "error",
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "idbus_calls_total",
                    "interface" => interface.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!("idbus_call_duration_seconds", "interface" => interface)
                    .record(elapsed.as_secs_f64());

                match &result {
                    Ok(_) => tracing::debug!(request_id, duration_ms, "method call complete"),
                    Err(err) => tracing::info!(
                        request_id,
                        duration_ms,
                        error_name = %err.name,
                        error = %err.message,
                        "method call failed"
                    ),
                }

                result
            }
            .instrument(span),
        )
    }
}
