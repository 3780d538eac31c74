use std::time::Duration;

/// Per-connection configuration for registration and dispatch.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum number of requests in flight before the handler entry reports
    /// starvation to the transport.
    pub max_in_flight_requests: usize,
    /// Maximum time a method handler may run before it is failed.
    pub method_timeout: Duration,
    /// How long a graceful shutdown waits for in-flight requests.
    pub drain_timeout: Duration,
    /// Number of sender identities kept by the caller cache.
    pub caller_cache_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_in_flight_requests: 1000,
            method_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
            caller_cache_capacity: 1024,
        }
    }
}
