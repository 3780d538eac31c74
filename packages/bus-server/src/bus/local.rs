//! In-process transport.
//!
//! Tracks exact and fallback claims the way a bus daemon's object tree does,
//! routes inbound messages to a [`BusConnection`] when their path is claimed,
//! and queues outbound messages on an unbounded channel, so every reply the
//! connection sends reaches the reader however far behind it is.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use idbus_core::path::ROOT;
use idbus_core::{error_names, ClaimError, Message, MethodError, SendError, Transport};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::connection::{BusConnection, HandlerResult};

/// How a path is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    Exact,
    /// Also routes every path below the claimed one.
    Fallback,
}

#[derive(Debug)]
pub struct LocalTransport {
    claims: Mutex<BTreeMap<String, ClaimKind>>,
    releases: Mutex<Vec<String>>,
    refused: Mutex<HashSet<String>>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl LocalTransport {
    /// Creates a transport and the receiving end of its outbound queue.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            claims: Mutex::new(BTreeMap::new()),
            releases: Mutex::new(Vec::new()),
            refused: Mutex::new(HashSet::new()),
            outbound: tx,
        });
        (transport, rx)
    }

    /// Makes every later claim on `path` fail with [`ClaimError::Refused`].
    pub fn refuse_claims_on(&self, path: &str) {
        self.refused.lock().insert(path.to_string());
    }

    /// Lifts a previous [`LocalTransport::refuse_claims_on`].
    pub fn allow_claims_on(&self, path: &str) {
        self.refused.lock().remove(path);
    }

    #[must_use]
    pub fn claim(&self, path: &str) -> Option<ClaimKind> {
        self.claims.lock().get(path).copied()
    }

    /// Current claims, sorted by path.
    #[must_use]
    pub fn claims(&self) -> Vec<(String, ClaimKind)> {
        self.claims
            .lock()
            .iter()
            .map(|(path, kind)| (path.clone(), *kind))
            .collect()
    }

    /// Every path released so far, in order.
    #[must_use]
    pub fn releases(&self) -> Vec<String> {
        self.releases.lock().clone()
    }

    /// Whether a message for `path` would reach the connection.
    #[must_use]
    pub fn routes(&self, path: &str) -> bool {
        let claims = self.claims.lock();
        claims.contains_key(path) || covered_by_fallback(&claims, path)
    }

    /// Forgets every claim, as after a reconnect to the bus.
    pub fn reset(&self) {
        let dropped = std::mem::take(&mut *self.claims.lock());
        debug!(claims = dropped.len(), "transport reset");
    }

    /// Delivers an inbound message to `conn`.
    ///
    /// Unrouted paths are answered here, as the bus would. When the connection
    /// reports starvation, a `NoMemory` error is sent in its place.
    pub fn deliver(&self, conn: &BusConnection, message: Message) -> HandlerResult {
        let path = message.path.clone().unwrap_or_default();
        if !self.routes(&path) {
            debug!(path = %path, "no object claimed at path");
            let error = MethodError::new(
                error_names::UNKNOWN_OBJECT,
                format!("No such object path '{path}'"),
            );
            if let Err(err) = self.send_error(&message, &error) {
                warn!(error = %err, "failed to send unknown-object reply");
            }
            return HandlerResult::Handled;
        }

        let starved_reply = message.error_reply(&MethodError::no_memory());
        let result = conn.handle_message(message);
        if result == HandlerResult::NeedMemory {
            if let Err(err) = self.send(starved_reply) {
                warn!(error = %err, "failed to send no-memory reply");
            }
        }
        result
    }
}

/// Whether a fallback claim on `path` or one of its ancestors exists.
fn covered_by_fallback(claims: &BTreeMap<String, ClaimKind>, path: &str) -> bool {
    claims.iter().any(|(claimed, kind)| {
        *kind == ClaimKind::Fallback
            && (claimed == path
                || claimed == ROOT
                || path
                    .strip_prefix(claimed.as_str())
                    .is_some_and(|rest| rest.starts_with('/')))
    })
}

impl Transport for LocalTransport {
    fn claim_path(&self, path: &str, fallback: bool) -> Result<(), ClaimError> {
        if self.refused.lock().contains(path) {
            return Err(ClaimError::Refused {
                path: path.to_string(),
                reason: "claims on this path are refused".to_string(),
            });
        }

        let mut claims = self.claims.lock();
        if claims.contains_key(path) || (!fallback && covered_by_fallback(&claims, path)) {
            return Err(ClaimError::AlreadyClaimed(path.to_string()));
        }

        let kind = if fallback {
            ClaimKind::Fallback
        } else {
            ClaimKind::Exact
        };
        trace!(path = %path, ?kind, "path claimed");
        claims.insert(path.to_string(), kind);
        Ok(())
    }

    fn release_path(&self, path: &str) {
        self.claims.lock().remove(path);
        self.releases.lock().push(path.to_string());
    }

    fn send(&self, message: Message) -> Result<(), SendError> {
        self.outbound
            .send(message)
            .map_err(|_| SendError::Disconnected)
    }
}
