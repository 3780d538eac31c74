use async_trait::async_trait;
use idbus_core::{DomainInfo, GroupRecord, UserRecord};

/// Name filter used by list lookups.
///
/// A trailing `*` makes the filter a prefix match; anything else must match
/// the whole name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFilter {
    Exact(String),
    Prefix(String),
}

impl NameFilter {
    #[must_use]
    pub fn parse(filter: &str) -> Self {
        match filter.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(filter.to_string()),
        }
    }

    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => name == exact,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

/// Read access to the identity cache that responders query.
///
/// `Ok(None)` means the entry does not exist; `Err` is a lookup failure.
#[async_trait]
pub trait IdentityCache: Send + Sync {
    /// Finds a domain by name, case-insensitively.
    async fn find_domain(&self, name: &str) -> anyhow::Result<Option<DomainInfo>>;

    /// Looks a user up by name across all domains, in domain order.
    async fn user_by_name(&self, name: &str) -> anyhow::Result<Option<(DomainInfo, UserRecord)>>;

    /// Looks a user up by uid across all domains, in domain order.
    async fn user_by_id(&self, uid: u32) -> anyhow::Result<Option<(DomainInfo, UserRecord)>>;

    /// Looks a user up by uid within one domain.
    async fn user_in_domain(&self, domain: &str, uid: u32) -> anyhow::Result<Option<UserRecord>>;

    /// Lists users matching `filter`, in one domain or across all of them.
    ///
    /// A `limit` of zero means no limit.
    async fn list_users(
        &self,
        domain: Option<&str>,
        filter: &NameFilter,
        limit: usize,
    ) -> anyhow::Result<Vec<(DomainInfo, UserRecord)>>;

    /// Resolves the groups `name` belongs to, refreshing the cached
    /// membership. `Ok(None)` if the user does not exist.
    async fn initgroups(&self, domain: &str, name: &str) -> anyhow::Result<Option<Vec<GroupRecord>>>;
}
