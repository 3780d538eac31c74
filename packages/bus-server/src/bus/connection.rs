//! Per-link connection state and the registration facade.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use idbus_core::path::{base_path, is_subtree, validate};
use idbus_core::{BusError, CallerResolver, ClaimError, Message, ObjectPath, Transport};
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::config::BusConfig;
use super::interface::{InstanceData, InterfaceVTable, RegisteredInterface};
use super::lifecycle::{LinkController, LinkState};
use super::path_table::{AddOutcome, PathTable};
use super::standard;

/// Result of handing an inbound message to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// The message was consumed; any reply is sent by the connection.
    Handled,
    /// No request could be built. The transport answers on the connection's
    /// behalf.
    NeedMemory,
}

/// State shared by the connection handle and its in-flight requests.
///
/// Requests and standard interfaces only hold a `Weak` reference, so the last
/// `BusConnection` clone going away tears the link down.
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) resolver: Arc<dyn CallerResolver>,
    pub(crate) config: BusConfig,
    pub(crate) table: RwLock<PathTable>,
    pub(crate) lifecycle: LinkController,
    pub(crate) limiter: Arc<Semaphore>,
    next_request_id: AtomicU64,
}

impl Shared {
    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Closes the link, releasing every claimed path. Runs once.
    pub(crate) fn teardown(&self) {
        if !self.lifecycle.mark_closed() {
            return;
        }
        let table = std::mem::take(&mut *self.table.write());
        let paths = table.len();
        table.teardown(self.transport.as_ref());
        info!(paths, "bus connection closed");
    }

    /// Sends `message` unless the link is closed.
    ///
    /// Returns whether the message was handed to the transport.
    pub(crate) fn send_if_alive(&self, message: Message) -> bool {
        if self.lifecycle.is_closed() {
            debug!(reply_serial = ?message.reply_serial, "connection closed, dropping reply");
            return false;
        }
        match self.transport.send(message) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to send reply");
                false
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// A bus link: the object-path table plus the transport it is published on.
///
/// Cloning yields another handle to the same link.
#[derive(Clone)]
pub struct BusConnection {
    pub(crate) shared: Arc<Shared>,
}

impl BusConnection {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn CallerResolver>,
        config: BusConfig,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_in_flight_requests));
        Self {
            shared: Arc::new(Shared {
                transport,
                resolver,
                config,
                table: RwLock::new(PathTable::new()),
                lifecycle: LinkController::new(),
                limiter,
                next_request_id: AtomicU64::new(1),
            }),
        }
    }

    /// Marks registration as finished.
    pub fn set_ready(&self) {
        self.shared.lifecycle.set_ready();
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    /// Binds `vtable` with `instance` to `path` (exact or subtree).
    ///
    /// The first interface on a new path key claims routing for it with the
    /// transport and brings along the standard interfaces.
    ///
    /// # Errors
    ///
    /// - [`BusError::InvalidArgument`] for an empty path or interface name
    /// - [`BusError::MalformedPath`] for a path that does not parse
    /// - [`BusError::DuplicateInterface`] if the interface is already at `path`
    /// - [`BusError::ResourceExhausted`] if the transport refuses the claim
    pub fn register_interface<T: Any + Send + Sync>(
        &self,
        vtable: Arc<InterfaceVTable>,
        path: &str,
        instance: Arc<T>,
    ) -> Result<(), BusError> {
        self.register_instance(vtable, path, instance)
    }

    pub(crate) fn register_instance(
        &self,
        vtable: Arc<InterfaceVTable>,
        path: &str,
        instance: InstanceData,
    ) -> Result<(), BusError> {
        if vtable.name().is_empty() {
            return Err(BusError::InvalidArgument("interface name is empty".to_string()));
        }
        validate(path)?;
        if self.shared.lifecycle.is_closed() {
            return Err(BusError::InvalidArgument("connection is closed".to_string()));
        }

        let object_path = ObjectPath::parse(path)?;
        let interface = vtable.name().to_string();
        let registration = Arc::new(RegisteredInterface::new(object_path, vtable, instance));

        let outcome = self.shared.table.write().add(registration)?;
        debug!(path = %path, interface = %interface, ?outcome, "interface registered");

        if outcome == AddOutcome::Known {
            return Ok(());
        }

        self.claim_path(path)?;
        standard::register_standard_interfaces(self, path)
    }

    /// Claims routing for every known path key again, e.g. after the
    /// transport reconnected.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ResourceExhausted`] on the first refused claim.
    pub fn reregister_all_paths(&self) -> Result<(), BusError> {
        let paths = self.shared.table.read().paths();
        info!(paths = paths.len(), "re-registering object paths");
        for path in &paths {
            self.claim_path(path)?;
        }
        Ok(())
    }

    fn claim_path(&self, path: &str) -> Result<(), BusError> {
        let transport = &self.shared.transport;

        if is_subtree(path) {
            let base = base_path(path);
            // An exact claim on the base path is superseded by the fallback.
            if self.shared.table.read().has_exact_path(base) {
                transport.release_path(base);
            }
            return transport
                .claim_path(base, true)
                .map_err(|err| claim_failed(path, &err));
        }

        match transport.claim_path(path, false) {
            Ok(()) => Ok(()),
            Err(ClaimError::AlreadyClaimed(_)) => {
                debug!(path = %path, "path already routed by a fallback");
                Ok(())
            }
            Err(err) => Err(claim_failed(path, &err)),
        }
    }

    /// Finds `interface` at `path`, walking up through subtree registrations.
    #[must_use]
    pub fn lookup_interface(&self, path: &str, interface: &str) -> Option<Arc<RegisteredInterface>> {
        self.shared.table.read().lookup_interface(path, interface)
    }

    /// Every interface visible at `path`, closest registration first.
    #[must_use]
    pub fn lookup_supported(&self, path: &str) -> Vec<Arc<RegisteredInterface>> {
        self.shared.table.read().lookup_all_supported(path)
    }

    #[must_use]
    pub fn registered_paths(&self) -> Vec<String> {
        self.shared.table.read().paths()
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.shared.lifecycle.state()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.shared.lifecycle.is_closed()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.shared.lifecycle.in_flight_count()
    }

    /// Closes the link immediately. In-flight requests drop their replies.
    pub fn disconnect(&self) {
        self.shared.teardown();
    }

    /// Stops accepting requests, waits up to `drain_timeout` for in-flight
    /// ones, then closes the link.
    ///
    /// Returns `true` if every in-flight request finished in time.
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        self.shared.lifecycle.begin_drain();
        info!(
            in_flight = self.in_flight_count(),
            timeout_ms = u64::try_from(drain_timeout.as_millis()).unwrap_or(u64::MAX),
            "draining bus connection"
        );

        let drained = self.shared.lifecycle.wait_for_drain(drain_timeout).await;
        if !drained {
            warn!(
                in_flight = self.in_flight_count(),
                "drain timed out, closing with requests in flight"
            );
        }
        self.shared.teardown();
        drained
    }
}

impl std::fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConnection")
            .field("state", &self.state())
            .field("paths", &self.shared.table.read().len())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

fn claim_failed(path: &str, err: &ClaimError) -> BusError {
    warn!(path = %path, error = %err, "failed to claim object path");
    BusError::ResourceExhausted(format!("cannot register object path {path}: {err}"))
}
