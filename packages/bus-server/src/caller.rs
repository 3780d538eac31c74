//! Caller identity resolvers.
//!
//! [`PeerCredentials`] answers from credentials the transport recorded when
//! each peer connected. [`CachedCallerResolver`] puts a bounded cache in front
//! of any resolver.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::DashMap;
use idbus_core::{CallerIdentity, CallerResolver};
use quick_cache::sync::Cache;
use tracing::trace;

/// Sender name to identity, filled in as peers connect.
#[derive(Debug, Default)]
pub struct PeerCredentials {
    peers: DashMap<String, CallerIdentity>,
    /// Identity used for messages that carry no sender.
    anonymous: Option<CallerIdentity>,
}

impl PeerCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves sender-less messages to `identity` instead of failing.
    #[must_use]
    pub fn with_anonymous(mut self, identity: CallerIdentity) -> Self {
        self.anonymous = Some(identity);
        self
    }

    pub fn insert(&self, sender: impl Into<String>, identity: CallerIdentity) {
        self.peers.insert(sender.into(), identity);
    }

    pub fn remove(&self, sender: &str) -> Option<CallerIdentity> {
        self.peers.remove(sender).map(|(_, identity)| identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[async_trait]
impl CallerResolver for PeerCredentials {
    async fn resolve_sender_identity(&self, sender: Option<&str>) -> anyhow::Result<CallerIdentity> {
        let Some(sender) = sender else {
            return self
                .anonymous
                .ok_or_else(|| anyhow!("message carries no sender"));
        };
        self.peers
            .get(sender)
            .map(|entry| *entry.value())
            .ok_or_else(|| anyhow!("no credentials recorded for peer {sender}"))
    }
}

/// Caches successful resolutions by sender name.
///
/// Failures and sender-less messages are never cached.
pub struct CachedCallerResolver {
    inner: Arc<dyn CallerResolver>,
    cache: Cache<String, CallerIdentity>,
}

impl CachedCallerResolver {
    #[must_use]
    pub fn new(inner: Arc<dyn CallerResolver>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Cache::new(capacity.max(1)),
        }
    }

    /// Forgets a sender, e.g. once the peer disconnected.
    pub fn invalidate(&self, sender: &str) {
        self.cache.remove(sender);
    }

    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl CallerResolver for CachedCallerResolver {
    async fn resolve_sender_identity(&self, sender: Option<&str>) -> anyhow::Result<CallerIdentity> {
        let Some(name) = sender else {
            return self.inner.resolve_sender_identity(None).await;
        };

        if let Some(identity) = self.cache.get(name) {
            trace!(sender = name, uid = identity.uid, "caller cache hit");
            return Ok(identity);
        }

        let identity = self.inner.resolve_sender_identity(sender).await?;
        self.cache.insert(name.to_string(), identity);
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counts how often the wrapped credentials are consulted.
    struct Counting {
        inner: PeerCredentials,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CallerResolver for Counting {
        async fn resolve_sender_identity(
            &self,
            sender: Option<&str>,
        ) -> anyhow::Result<CallerIdentity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve_sender_identity(sender).await
        }
    }

    #[tokio::test]
    async fn peer_credentials_resolve_known_senders() {
        let creds = PeerCredentials::new();
        creds.insert(":1.5", CallerIdentity { uid: 1000, pid: Some(42) });

        let identity = creds.resolve_sender_identity(Some(":1.5")).await.unwrap();
        assert_eq!(identity.uid, 1000);
        assert_eq!(identity.pid, Some(42));

        let err = creds.resolve_sender_identity(Some(":1.6")).await.unwrap_err();
        assert!(err.to_string().contains(":1.6"));
    }

    #[tokio::test]
    async fn missing_sender_needs_anonymous_identity() {
        let creds = PeerCredentials::new();
        assert!(creds.resolve_sender_identity(None).await.is_err());

        let creds = PeerCredentials::new().with_anonymous(CallerIdentity::uid(0));
        assert_eq!(creds.resolve_sender_identity(None).await.unwrap().uid, 0);
    }

    #[tokio::test]
    async fn removed_peer_no_longer_resolves() {
        let creds = PeerCredentials::new();
        creds.insert(":1.5", CallerIdentity::uid(7));
        assert_eq!(creds.remove(":1.5"), Some(CallerIdentity::uid(7)));
        assert!(creds.is_empty());
        assert!(creds.resolve_sender_identity(Some(":1.5")).await.is_err());
    }

    #[tokio::test]
    async fn cache_hits_skip_inner_resolver() {
        let counting = Arc::new(Counting {
            inner: PeerCredentials::new(),
            calls: AtomicUsize::new(0),
        });
        counting.inner.insert(":1.5", CallerIdentity::uid(1000));
        let cached = CachedCallerResolver::new(counting.clone(), 16);

        for _ in 0..3 {
            let identity = cached.resolve_sender_identity(Some(":1.5")).await.unwrap();
            assert_eq!(identity.uid, 1000);
        }
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.cached(), 1);

        cached.invalidate(":1.5");
        cached.resolve_sender_identity(Some(":1.5")).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let counting = Arc::new(Counting {
            inner: PeerCredentials::new(),
            calls: AtomicUsize::new(0),
        });
        let cached = CachedCallerResolver::new(counting.clone(), 16);

        assert!(cached.resolve_sender_identity(Some(":1.9")).await.is_err());
        counting.inner.insert(":1.9", CallerIdentity::uid(5));
        assert_eq!(
            cached.resolve_sender_identity(Some(":1.9")).await.unwrap().uid,
            5
        );
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }
}
