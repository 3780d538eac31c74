//! Pipeline composition: the middleware stack every method call runs through.

use bytes::Bytes;
use idbus_core::MethodError;
use tower::ServiceBuilder;

use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use super::{Invocation, InvokeService};
use crate::bus::interface::InvokeFuture;

/// Builds the invocation pipeline.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer`, so timeouts are counted as failed calls
/// 2. `TimeoutLayer`
/// 3. `InvokeService`
#[must_use]
pub fn build_invoke_pipeline(
) -> impl tower::Service<Invocation, Response = Bytes, Error = MethodError, Future = InvokeFuture>
       + Clone
       + Send {
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(TimeoutLayer)
        .service(InvokeService)
}
