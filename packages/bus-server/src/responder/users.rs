//! User lookup interfaces.
//!
//! `org.idbus.Users` on `/org/idbus/Users` finds users and returns their
//! object paths. Every user object lives below it at
//! `/org/idbus/Users/<domain>/<uid>` and carries `org.idbus.Users.User`,
//! registered once on the subtree.

use std::collections::BTreeMap;
use std::sync::Arc;

use idbus_core::path::{compose, decompose_exact};
use idbus_core::{BusError, DomainInfo, GroupRecord, MethodError, PropertyValue, UserRecord};
use tracing::{debug, trace, warn};

use super::config::ResponderConfig;
use crate::bus::{BusConnection, InterfaceVTable, MethodDescriptor, PropertyDescriptor};
use crate::traits::{IdentityCache, NameFilter};

pub const USERS_PATH: &str = "/org/idbus/Users";
pub const GROUPS_PATH: &str = "/org/idbus/Groups";
pub const USERS_INTERFACE: &str = "org.idbus.Users";
pub const USER_INTERFACE: &str = "org.idbus.Users.User";

/// Why a user lookup produced no answer.
#[derive(Debug, thiserror::Error)]
pub enum UserLookupError {
    #[error("User not found")]
    NotFound,
    #[error("Domain not found: {0}")]
    DomainNotFound(String),
    #[error("Invalid user object path: {0}")]
    InvalidPath(String),
    #[error("Failed to compose object path")]
    NoObjectPath,
    #[error("User name is empty")]
    NoName,
    #[error("Failed to fetch user: {0:#}")]
    Lookup(#[from] anyhow::Error),
}

impl From<UserLookupError> for MethodError {
    fn from(err: UserLookupError) -> Self {
        let message = err.to_string();
        match err {
            UserLookupError::NotFound | UserLookupError::DomainNotFound(_) => {
                MethodError::not_found(message)
            }
            UserLookupError::InvalidPath(_) => MethodError::invalid_args(message),
            UserLookupError::NoObjectPath | UserLookupError::NoName => MethodError::internal(message),
            UserLookupError::Lookup(_) => MethodError::failed(message),
        }
    }
}

/// Object path of a user entry, if it has a uid.
#[must_use]
pub fn user_path(domain: &DomainInfo, user: &UserRecord) -> Option<String> {
    let uid = user.uid?.to_string();
    Some(compose(USERS_PATH, &[&domain.name, &uid]))
}

/// Object path of a group entry, if it has a gid.
#[must_use]
pub fn group_path(domain: &DomainInfo, group: &GroupRecord) -> Option<String> {
    let gid = group.gid?.to_string();
    Some(compose(GROUPS_PATH, &[&domain.name, &gid]))
}

/// Serves user lookups from an [`IdentityCache`].
pub struct UsersResponder {
    cache: Arc<dyn IdentityCache>,
    config: ResponderConfig,
}

impl UsersResponder {
    #[must_use]
    pub fn new(cache: Arc<dyn IdentityCache>, config: ResponderConfig) -> Self {
        Self { cache, config }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<String, UserLookupError> {
        let (domain, user) = self
            .cache
            .user_by_name(name)
            .await?
            .ok_or(UserLookupError::NotFound)?;
        user_path(&domain, &user).ok_or(UserLookupError::NoObjectPath)
    }

    pub async fn find_by_id(&self, uid: u32) -> Result<String, UserLookupError> {
        let (domain, user) = self
            .cache
            .user_by_id(uid)
            .await?
            .ok_or(UserLookupError::NotFound)?;
        user_path(&domain, &user).ok_or(UserLookupError::NoObjectPath)
    }

    pub async fn list_by_name(&self, filter: &str, limit: u32) -> Result<Vec<String>, UserLookupError> {
        self.list(None, filter, limit).await
    }

    pub async fn list_by_domain_and_name(
        &self,
        domain: &str,
        filter: &str,
        limit: u32,
    ) -> Result<Vec<String>, UserLookupError> {
        let domain = self
            .cache
            .find_domain(domain)
            .await?
            .ok_or_else(|| UserLookupError::DomainNotFound(domain.to_string()))?;
        self.list(Some(&domain.name), filter, limit).await
    }

    async fn list(
        &self,
        domain: Option<&str>,
        filter: &str,
        limit: u32,
    ) -> Result<Vec<String>, UserLookupError> {
        let filter = NameFilter::parse(filter);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let users = self.cache.list_users(domain, &filter, limit).await?;

        Ok(users
            .iter()
            .filter_map(|(domain, user)| {
                let path = user_path(domain, user);
                if path.is_none() {
                    debug!(user = %user.name, domain = %domain.name, "skipping user without uid");
                }
                path
            })
            .collect())
    }

    /// Refreshes the group membership of the user at `path`.
    pub async fn update_groups_list(&self, path: &str) -> Result<(), UserLookupError> {
        let (domain, user) = self.user_at(path).await?;
        if user.name.is_empty() {
            return Err(UserLookupError::NoName);
        }
        self.cache
            .initgroups(&domain.name, &user.name)
            .await?
            .ok_or(UserLookupError::NotFound)?;
        Ok(())
    }

    /// Decomposes a user object path into its domain and uid.
    async fn resolve_path(&self, path: &str) -> Result<(DomainInfo, u32), UserLookupError> {
        let parts = decompose_exact(path, USERS_PATH, 2)
            .map_err(|_| UserLookupError::InvalidPath(path.to_string()))?;
        let domain = self
            .cache
            .find_domain(&parts[0])
            .await?
            .ok_or_else(|| UserLookupError::DomainNotFound(parts[0].clone()))?;
        let uid = parts[1]
            .parse::<u32>()
            .map_err(|_| UserLookupError::InvalidPath(path.to_string()))?;
        Ok((domain, uid))
    }

    async fn user_at(&self, path: &str) -> Result<(DomainInfo, UserRecord), UserLookupError> {
        let (domain, uid) = self.resolve_path(path).await?;
        let user = self
            .cache
            .user_in_domain(&domain.name, uid)
            .await?
            .ok_or(UserLookupError::NotFound)?;
        Ok((domain, user))
    }

    /// Loads the user at `path` for reading `attr`, or `None` if the attribute
    /// is not exported or the lookup fails.
    async fn readable_user(&self, path: &str, attr: &str) -> Option<(DomainInfo, UserRecord)> {
        if !self.config.is_user_attr_allowed(attr) {
            trace!(attr, "attribute is not allowed");
            return None;
        }
        match self.user_at(path).await {
            Ok(found) => Some(found),
            Err(err) => {
                debug!(path, attr, error = %err, "cannot read user attribute");
                None
            }
        }
    }

    pub async fn string_attribute(&self, path: &str, attr: &str) -> String {
        self.readable_user(path, attr)
            .await
            .and_then(|(_, user)| attribute_values(&user, attr).into_iter().next())
            .unwrap_or_default()
    }

    pub async fn u32_attribute(&self, path: &str, attr: &str) -> u32 {
        self.readable_user(path, attr)
            .await
            .and_then(|(_, user)| attribute_values(&user, attr).into_iter().next())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    /// Object paths of the user's groups. Groups with gid 0 are skipped.
    pub async fn groups(&self, path: &str) -> Vec<String> {
        let Some((domain, user)) = self.readable_user(path, "groups").await else {
            return Vec::new();
        };
        if user.name.is_empty() {
            warn!(path, "user name is empty");
            return Vec::new();
        }

        let groups = match self.cache.initgroups(&domain.name, &user.name).await {
            Ok(Some(groups)) => groups,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(user = %user.name, domain = %domain.name, error = %err, "unable to get groups");
                return Vec::new();
            }
        };

        groups
            .iter()
            .filter(|group| group.gid.is_some_and(|gid| gid != 0))
            .filter_map(|group| group_path(&domain, group))
            .collect()
    }

    /// Configured extra attributes present on the user, with all values.
    pub async fn extra_attributes(&self, path: &str) -> BTreeMap<String, Vec<String>> {
        if self.config.extra_attributes.is_empty() {
            trace!("no extra attributes to return");
            return BTreeMap::new();
        }
        let user = match self.user_at(path).await {
            Ok((_, user)) => user,
            Err(err) => {
                debug!(path, error = %err, "cannot read extra attributes");
                return BTreeMap::new();
            }
        };

        self.config
            .extra_attributes
            .iter()
            .filter_map(|attr| {
                let values = attribute_values(&user, attr);
                if values.is_empty() {
                    trace!(attr = %attr, "attribute not found, skipping");
                    None
                } else {
                    Some((attr.clone(), values))
                }
            })
            .collect()
    }
}

/// Values of `attr` on `user`, standard attributes included.
fn attribute_values(user: &UserRecord, attr: &str) -> Vec<String> {
    let single = |value: Option<String>| value.into_iter().collect();
    match attr {
        "name" if !user.name.is_empty() => vec![user.name.clone()],
        "uidNumber" => single(user.uid.map(|uid| uid.to_string())),
        "gidNumber" => single(user.gid.map(|gid| gid.to_string())),
        "gecos" => single(user.gecos.clone()),
        "homeDirectory" => single(user.home_directory.clone()),
        "loginShell" => single(user.login_shell.clone()),
        other => user.attributes.get(other).cloned().unwrap_or_default(),
    }
}

fn string_property(name: &'static str, attr: &'static str) -> PropertyDescriptor {
    PropertyDescriptor::new(name, move |call, users: Arc<UsersResponder>| async move {
        PropertyValue::String(users.string_attribute(&call.path, attr).await)
    })
}

fn u32_property(name: &'static str, attr: &'static str) -> PropertyDescriptor {
    PropertyDescriptor::new(name, move |call, users: Arc<UsersResponder>| async move {
        PropertyValue::U32(users.u32_attribute(&call.path, attr).await)
    })
}

fn users_vtable() -> Arc<InterfaceVTable> {
    InterfaceVTable::builder(USERS_INTERFACE)
        .method(MethodDescriptor::new(
            "FindByName",
            |_call, users: Arc<UsersResponder>, (name,): (String,)| async move {
                users.find_by_name(&name).await.map_err(MethodError::from)
            },
        ))
        .method(MethodDescriptor::new(
            "FindByID",
            |_call, users: Arc<UsersResponder>, (uid,): (u32,)| async move {
                users.find_by_id(uid).await.map_err(MethodError::from)
            },
        ))
        .method(MethodDescriptor::new(
            "ListByName",
            |_call, users: Arc<UsersResponder>, (filter, limit): (String, u32)| async move {
                users.list_by_name(&filter, limit).await.map_err(MethodError::from)
            },
        ))
        .method(MethodDescriptor::new(
            "ListByDomainAndName",
            |_call,
             users: Arc<UsersResponder>,
             (domain, filter, limit): (String, String, u32)| async move {
                users
                    .list_by_domain_and_name(&domain, &filter, limit)
                    .await
                    .map_err(MethodError::from)
            },
        ))
        .build()
}

fn user_vtable() -> Arc<InterfaceVTable> {
    InterfaceVTable::builder(USER_INTERFACE)
        .method(MethodDescriptor::no_args(
            "UpdateGroupsList",
            |call, users: Arc<UsersResponder>| async move {
                users
                    .update_groups_list(&call.path)
                    .await
                    .map_err(MethodError::from)
            },
        ))
        .property(string_property("name", "name"))
        .property(u32_property("uidNumber", "uidNumber"))
        .property(u32_property("gidNumber", "gidNumber"))
        .property(string_property("gecos", "gecos"))
        .property(string_property("homeDirectory", "homeDirectory"))
        .property(string_property("loginShell", "loginShell"))
        .property(PropertyDescriptor::new(
            "groups",
            |call, users: Arc<UsersResponder>| async move {
                PropertyValue::ObjectPathArray(users.groups(&call.path).await)
            },
        ))
        .property(PropertyDescriptor::new(
            "extraAttributes",
            |call, users: Arc<UsersResponder>| async move {
                PropertyValue::StringMap(users.extra_attributes(&call.path).await)
            },
        ))
        .build()
}

/// Publishes the users interfaces on `conn`.
///
/// # Errors
///
/// Propagates registration failures from the connection.
pub fn register(conn: &BusConnection, responder: Arc<UsersResponder>) -> Result<(), BusError> {
    conn.register_interface(users_vtable(), USERS_PATH, Arc::clone(&responder))?;
    conn.register_interface(user_vtable(), &format!("{USERS_PATH}/*"), responder)
}
