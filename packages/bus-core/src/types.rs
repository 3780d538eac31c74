use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Resolved identity of the process that sent a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Unix user id of the calling process.
    pub uid: u32,
    /// Process id, when the transport knows it.
    pub pid: Option<u32>,
}

impl CallerIdentity {
    #[must_use]
    pub fn uid(uid: u32) -> Self {
        Self { uid, pid: None }
    }
}

/// An identity domain served by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub name: String,
}

/// A cached user entry.
///
/// Standard attributes are typed; everything else the identity store returned
/// is kept in `attributes` so extra attributes can be exported on request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub gecos: Option<String>,
    pub home_directory: Option<String>,
    pub login_shell: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

/// A cached group entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    pub gid: Option<u32>,
}

/// Value returned by a property getter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    U32(u32),
    ObjectPath(String),
    ObjectPathArray(Vec<String>),
    /// Attribute name to values.
    StringMap(BTreeMap<String, Vec<String>>),
}
