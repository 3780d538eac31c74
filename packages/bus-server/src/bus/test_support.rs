//! Shared fixtures for dispatcher tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use idbus_core::{CallerIdentity, CallerResolver, Message};
use tokio::sync::{mpsc, Notify};

use super::config::BusConfig;
use super::connection::BusConnection;
use super::local::LocalTransport;

/// Resolver that answers with a fixed uid, optionally failing or waiting on a
/// gate first.
pub(crate) struct StubResolver {
    uid: u32,
    failure: Option<String>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl StubResolver {
    pub(crate) fn uid(uid: u32) -> Arc<Self> {
        Arc::new(Self {
            uid,
            failure: None,
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            uid: 0,
            failure: Some(reason.to_string()),
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Resolves only after `gate` is notified.
    pub(crate) fn gated(uid: u32, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            uid,
            failure: None,
            gate: Some(gate),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallerResolver for StubResolver {
    async fn resolve_sender_identity(&self, _sender: Option<&str>) -> anyhow::Result<CallerIdentity> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.failure {
            Some(reason) => Err(anyhow::anyhow!("{reason}")),
            None => Ok(CallerIdentity::uid(self.uid)),
        }
    }
}

pub(crate) struct Harness {
    pub(crate) conn: BusConnection,
    pub(crate) transport: Arc<LocalTransport>,
    pub(crate) outbound: mpsc::UnboundedReceiver<Message>,
}

pub(crate) fn harness(resolver: Arc<dyn CallerResolver>) -> Harness {
    harness_with(resolver, BusConfig::default())
}

pub(crate) fn harness_with(resolver: Arc<dyn CallerResolver>, config: BusConfig) -> Harness {
    let (transport, outbound) = LocalTransport::new();
    let conn = BusConnection::new(transport.clone(), resolver, config);
    Harness {
        conn,
        transport,
        outbound,
    }
}

/// Waits for the next outbound message.
pub(crate) async fn recv_reply(outbound: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(2), outbound.recv())
        .await
        .expect("timed out waiting for a reply")
        .expect("outbound channel closed")
}

/// Asserts nothing is sent within `wait`.
pub(crate) async fn assert_no_reply(outbound: &mut mpsc::UnboundedReceiver<Message>, wait: Duration) {
    if let Ok(Some(message)) = tokio::time::timeout(wait, outbound.recv()).await {
        panic!("unexpected outbound message: {message:?}");
    }
}
