//! Inbound message entry point.
//!
//! Routing happens synchronously: the interface is found by walking up the
//! path table and the method by name in its table. Anything that cannot be
//! routed is answered at once with an unknown-method error. Routed requests
//! are handed to a spawned [`PendingRequest`].

use std::sync::Arc;

use idbus_core::{BusError, Message, MessageKind, MethodError};
use tracing::{debug, trace, warn};

use super::connection::{BusConnection, HandlerResult};
use super::lifecycle::LinkState;
use super::request::{PendingRequest, RequestHeader};

impl BusConnection {
    /// Handles one inbound message addressed to a claimed path.
    ///
    /// Must be called from within a Tokio runtime. Returns
    /// [`HandlerResult::NeedMemory`] when the in-flight limit is reached; the
    /// transport is then expected to answer the caller itself.
    pub fn handle_message(&self, message: Message) -> HandlerResult {
        if message.kind != MessageKind::MethodCall {
            trace!(kind = ?message.kind, "ignoring non-call message");
            return HandlerResult::Handled;
        }

        let shared = &self.shared;
        let state = shared.lifecycle.state();
        if !state.accepts_requests() {
            if state == LinkState::Draining {
                let error = MethodError::failed("The service is shutting down");
                shared.send_if_alive(message.error_reply(&error));
                count("draining");
            } else {
                debug!(serial = message.serial, "connection closed, dropping request");
                count("dropped");
            }
            return HandlerResult::Handled;
        }

        let header = RequestHeader::extract(&message);
        trace!(
            path = %header.path,
            interface = %header.interface,
            member = %header.member,
            sender = ?header.sender,
            "received method call"
        );

        let Some(iface) = shared
            .table
            .read()
            .lookup_interface(&header.path, &header.interface)
        else {
            reply_unknown_method(self, &message, header);
            return HandlerResult::Handled;
        };

        let Some(invoker) = iface
            .vtable()
            .find_method(&header.member)
            .and_then(|method| method.invoker())
            .map(Arc::clone)
        else {
            reply_unknown_method(self, &message, header);
            return HandlerResult::Handled;
        };

        let Ok(permit) = Arc::clone(&shared.limiter).try_acquire_owned() else {
            warn!(
                limit = shared.config.max_in_flight_requests,
                "too many requests in flight"
            );
            count("starved");
            return HandlerResult::NeedMemory;
        };

        let request = PendingRequest::new(shared, header, message, iface, invoker, permit);
        trace!(request_id = request.id(), "request dispatched");
        tokio::spawn(request.run());
        count("dispatched");
        HandlerResult::Handled
    }
}

fn reply_unknown_method(conn: &BusConnection, message: &Message, header: RequestHeader) {
    let err = BusError::UnknownMethod {
        interface: header.interface,
        member: header.member,
        path: header.path,
    };
    debug!(error = %err, "unroutable method call");
    conn.shared.send_if_alive(message.error_reply(&MethodError::from(err)));
    count("unknown_method");
}

fn count(outcome: &'static str) {
    metrics::counter!("idbus_dispatch_total", "outcome" => outcome).increment(1);
}
