//! Per-message request state machine.
//!
//! A [`PendingRequest`] is created once the target interface and method are
//! known. It resolves the caller's identity, invokes the handler through the
//! middleware pipeline and sends exactly one reply. Replies go through a
//! liveness check: a request whose connection has closed drops its reply.

use std::sync::{Arc, Weak};

use idbus_core::{BusError, Message, MethodError};
use tokio::sync::{watch, OwnedSemaphorePermit};
use tower::ServiceExt;
use tracing::{debug, trace, warn};

use super::connection::Shared;
use super::interface::{CallContext, Invoker, RegisteredInterface};
use super::lifecycle::InFlightGuard;
use super::middleware::{build_invoke_pipeline, Invocation};

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    AwaitingCallerId,
    Invoking,
    Replied,
    Failed,
    /// The connection closed; no reply was sent.
    Abandoned,
}

/// Routing keys taken from the request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestHeader {
    pub(crate) path: String,
    pub(crate) interface: String,
    pub(crate) member: String,
    pub(crate) sender: Option<String>,
}

impl RequestHeader {
    pub(crate) fn extract(message: &Message) -> Self {
        Self {
            path: message.path.clone().unwrap_or_default(),
            interface: message.interface.clone().unwrap_or_default(),
            member: message.member.clone().unwrap_or_default(),
            sender: message.sender.clone(),
        }
    }
}

pub(crate) struct PendingRequest {
    id: u64,
    link: Weak<Shared>,
    header: RequestHeader,
    /// Taken when a reply is sent or the request is abandoned.
    message: Option<Message>,
    iface: Arc<RegisteredInterface>,
    invoker: Arc<dyn Invoker>,
    state: RequestState,
    _permit: OwnedSemaphorePermit,
    _in_flight: InFlightGuard,
}

impl PendingRequest {
    pub(crate) fn new(
        shared: &Arc<Shared>,
        header: RequestHeader,
        message: Message,
        iface: Arc<RegisteredInterface>,
        invoker: Arc<dyn Invoker>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        metrics::gauge!("idbus_requests_in_flight").increment(1.0);
        Self {
            id: shared.next_request_id(),
            link: Arc::downgrade(shared),
            header,
            message: Some(message),
            iface,
            invoker,
            state: RequestState::AwaitingCallerId,
            _permit: permit,
            _in_flight: shared.lifecycle.in_flight_guard(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Drives the request to its single reply and reports where it ended.
    pub(crate) async fn run(mut self) -> RequestState {
        let Some(shared) = self.link.upgrade() else {
            self.abandon("connection dropped before caller resolution");
            return self.state;
        };
        let resolver = Arc::clone(&shared.resolver);
        let timeout = shared.config.method_timeout;
        let closed = shared.lifecycle.closed_receiver();
        drop(shared);

        self.state = RequestState::AwaitingCallerId;
        let sender = self.header.sender.clone();
        let resolved = tokio::select! {
            biased;
            () = link_closed(closed) => {
                self.abandon("connection closed while resolving caller");
                return self.state;
            }
            resolved = resolver.resolve_sender_identity(sender.as_deref()) => resolved,
        };

        let caller = match resolved {
            Ok(caller) => caller,
            Err(err) => {
                let err = BusError::CallerResolutionFailed(format!("{err:#}"));
                return self.fail(MethodError::from(err));
            }
        };

        self.state = RequestState::Invoking;
        debug!(
            request_id = self.id,
            uid = caller.uid,
            interface = %self.header.interface,
            member = %self.header.member,
            "invoking handler"
        );

        let invocation = Invocation {
            call: CallContext {
                request_id: self.id,
                path: self.header.path.clone(),
                interface: self.header.interface.clone(),
                member: self.header.member.clone(),
                sender: self.header.sender.clone(),
                caller,
            },
            instance: Arc::clone(self.iface.instance()),
            invoker: Arc::clone(&self.invoker),
            body: self
                .message
                .as_ref()
                .map(|message| message.body.clone())
                .unwrap_or_default(),
            timeout,
        };

        let id = self.id;
        let state = match build_invoke_pipeline().oneshot(invocation).await {
            Ok(body) => self.finish(body),
            Err(err) => self.fail(err),
        };
        trace!(request_id = id, ?state, "request complete");
        state
    }

    /// Sends the method return.
    fn finish(mut self, body: bytes::Bytes) -> RequestState {
        if let Some(message) = self.message.take() {
            let reply = message.method_return(body);
            self.deliver(reply, RequestState::Replied);
        }
        self.state
    }

    /// Sends an error reply.
    fn fail(mut self, error: MethodError) -> RequestState {
        if let Some(message) = self.message.take() {
            debug!(request_id = self.id, error = %error, "request failed");
            let reply = message.error_reply(&error);
            self.deliver(reply, RequestState::Failed);
        }
        self.state
    }

    fn abandon(&mut self, reason: &str) {
        self.message = None;
        self.state = RequestState::Abandoned;
        debug!(request_id = self.id, reason, "request abandoned");
    }

    fn deliver(&mut self, reply: Message, state: RequestState) {
        let sent = self
            .link
            .upgrade()
            .is_some_and(|shared| shared.send_if_alive(reply));
        self.state = if sent { state } else { RequestState::Abandoned };
    }
}

/// Completes once the link reports closed, or its controller is gone.
async fn link_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|is_closed| *is_closed).await;
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        metrics::gauge!("idbus_requests_in_flight").decrement(1.0);

        let Some(message) = self.message.take() else {
            return;
        };
        warn!(
            request_id = self.id,
            state = ?self.state,
            interface = %self.header.interface,
            member = %self.header.member,
            "request dropped without a reply"
        );
        let error = MethodError::failed("The request was dropped before a reply was sent");
        self.deliver(message.error_reply(&error), RequestState::Failed);
    }
}
