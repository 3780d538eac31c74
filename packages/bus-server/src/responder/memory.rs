//! Identity cache backed by a JSON document held in memory.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use idbus_core::{DomainInfo, GroupRecord, UserRecord};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::traits::{IdentityCache, NameFilter};

/// On-disk layout of the identity store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityStore {
    #[serde(default)]
    pub domains: Vec<StoredDomain>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDomain {
    pub name: String,
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub groups: Vec<StoredGroup>,
}

/// A group together with the names of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredGroup {
    pub name: String,
    pub gid: Option<u32>,
    #[serde(default)]
    pub members: Vec<String>,
}

impl StoredDomain {
    fn info(&self) -> DomainInfo {
        DomainInfo {
            name: self.name.clone(),
        }
    }
}

impl IdentityStore {
    /// Parses a store from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid store document.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid identity store document")
    }

    /// Reads a store from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read identity store {}", path.display()))?;
        let store = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            domains = store.domains.len(),
            "loaded identity store"
        );
        Ok(store)
    }
}

/// [`IdentityCache`] over an [`IdentityStore`].
///
/// Domains are searched in document order.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    store: RwLock<IdentityStore>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new(store: IdentityStore) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }

    /// Swaps in a new store, e.g. after the backing file changed.
    pub fn replace(&self, store: IdentityStore) {
        *self.store.write() = store;
    }

    fn find_user<P>(&self, mut matches: P) -> Option<(DomainInfo, UserRecord)>
    where
        P: FnMut(&UserRecord) -> bool,
    {
        let store = self.store.read();
        store.domains.iter().find_map(|domain| {
            domain
                .users
                .iter()
                .find(|user| matches(user))
                .map(|user| (domain.info(), user.clone()))
        })
    }
}

#[async_trait]
impl IdentityCache for InMemoryCache {
    async fn find_domain(&self, name: &str) -> anyhow::Result<Option<DomainInfo>> {
        let store = self.store.read();
        Ok(store
            .domains
            .iter()
            .find(|domain| domain.name.eq_ignore_ascii_case(name))
            .map(StoredDomain::info))
    }

    async fn user_by_name(&self, name: &str) -> anyhow::Result<Option<(DomainInfo, UserRecord)>> {
        Ok(self.find_user(|user| user.name == name))
    }

    async fn user_by_id(&self, uid: u32) -> anyhow::Result<Option<(DomainInfo, UserRecord)>> {
        Ok(self.find_user(|user| user.uid == Some(uid)))
    }

    async fn user_in_domain(&self, domain: &str, uid: u32) -> anyhow::Result<Option<UserRecord>> {
        let store = self.store.read();
        Ok(store
            .domains
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(domain))
            .and_then(|d| d.users.iter().find(|user| user.uid == Some(uid)))
            .cloned())
    }

    async fn list_users(
        &self,
        domain: Option<&str>,
        filter: &NameFilter,
        limit: usize,
    ) -> anyhow::Result<Vec<(DomainInfo, UserRecord)>> {
        let limit = if limit == 0 { usize::MAX } else { limit };
        let store = self.store.read();

        let found: Vec<_> = store
            .domains
            .iter()
            .filter(|d| domain.is_none_or(|wanted| d.name.eq_ignore_ascii_case(wanted)))
            .flat_map(|d| {
                d.users
                    .iter()
                    .filter(|user| filter.matches(&user.name))
                    .map(|user| (d.info(), user.clone()))
            })
            .take(limit)
            .collect();
        debug!(?filter, count = found.len(), "listed users");
        Ok(found)
    }

    async fn initgroups(&self, domain: &str, name: &str) -> anyhow::Result<Option<Vec<GroupRecord>>> {
        let store = self.store.read();
        let Some(domain) = store
            .domains
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(domain))
        else {
            return Ok(None);
        };
        if !domain.users.iter().any(|user| user.name == name) {
            return Ok(None);
        }

        Ok(Some(
            domain
                .groups
                .iter()
                .filter(|group| group.members.iter().any(|member| member == name))
                .map(|group| GroupRecord {
                    name: group.name.clone(),
                    gid: group.gid,
                })
                .collect(),
        ))
    }
}
