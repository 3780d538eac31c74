//! Object-path algebra.
//!
//! Object paths are `/`-separated hierarchical keys. A path ending in `/*` is
//! a *subtree* path: it stands for its base path and every path below it.
//! Lookups walk up the hierarchy by repeatedly applying [`parent_subtree`]:
//!
//! ```text
//! /org/a/1  ->  /org/a/*  ->  /org/*  ->  /*  ->  (none)
//! ```
//!
//! Every step strictly shortens the base path, so the walk terminates after at
//! most one step per path element.

use std::fmt;
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// The root object path.
pub const ROOT: &str = "/";

/// Element that turns a path into a subtree path.
pub const SUBTREE_ELEMENT: &str = "*";

static OBJECT_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:(?:[A-Za-z0-9_]+/)*(?:[A-Za-z0-9_]+|\*))?$")
        .expect("object path pattern is valid")
});

/// Returns `true` if `path` is a subtree path (ends with `/*`).
#[must_use]
pub fn is_subtree(path: &str) -> bool {
    path.len() >= 2 && path.ends_with("/*")
}

/// Strips the subtree suffix from `path`.
///
/// `/org/a/*` yields `/org/a`, `/*` yields `/`. Non-subtree paths are returned
/// unchanged.
#[must_use]
pub fn base_path(path: &str) -> &str {
    if !is_subtree(path) {
        return path;
    }

    let without_star = &path[..path.len() - 1];
    if without_star.len() > 1 {
        &without_star[..without_star.len() - 1]
    } else {
        without_star
    }
}

/// Computes the subtree pattern one level above `path`.
///
/// Returns `Ok(None)` once the walk reaches the root.
///
/// # Errors
///
/// Returns [`BusError::MalformedPath`] if the base path has no separator or
/// ends with one (an object path may not end with `/`).
pub fn parent_subtree(path: &str) -> Result<Option<String>, BusError> {
    let base = base_path(path);
    if base == ROOT {
        return Ok(None);
    }

    let Some(slash) = base.rfind('/') else {
        return Err(BusError::MalformedPath(path.to_string()));
    };

    if slash + 1 == base.len() {
        return Err(BusError::MalformedPath(path.to_string()));
    }

    let mut parent = String::with_capacity(slash + 2);
    parent.push_str(&base[..=slash]);
    parent.push_str(SUBTREE_ELEMENT);
    Ok(Some(parent))
}

/// Checks that `path` is a syntactically valid object path.
///
/// Elements consist of `[A-Za-z0-9_]`; the last element may be `*`.
///
/// # Errors
///
/// Returns [`BusError::InvalidArgument`] for an empty path and
/// [`BusError::MalformedPath`] for anything else that does not parse.
pub fn validate(path: &str) -> Result<(), BusError> {
    if path.is_empty() {
        return Err(BusError::InvalidArgument("object path is empty".to_string()));
    }
    if OBJECT_PATH_RE.is_match(path) {
        Ok(())
    } else {
        Err(BusError::MalformedPath(path.to_string()))
    }
}

/// Escapes an arbitrary string into a single object-path element.
///
/// Bytes outside `[A-Za-z0-9]` become `_xx` (lowercase hex). The empty string
/// is encoded as a lone `_`.
#[must_use]
pub fn escape_part(part: &str) -> String {
    if part.is_empty() {
        return "_".to_string();
    }

    let mut escaped = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() {
            escaped.push(char::from(byte));
        } else {
            // Writing into a String cannot fail.
            let _ = write!(escaped, "_{byte:02x}");
        }
    }
    escaped
}

/// Reverses [`escape_part`]. Input that is not a valid escape sequence is
/// returned verbatim.
#[must_use]
pub fn unescape_part(part: &str) -> String {
    if part == "_" {
        return String::new();
    }

    let bytes = part.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let decoded = bytes
                .get(i + 1)
                .zip(bytes.get(i + 2))
                .and_then(|(hi, lo)| Some((hex_value(*hi)? << 4) | hex_value(*lo)?));
            match decoded {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => return part.to_string(),
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).unwrap_or_else(|_| part.to_string())
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

/// Builds `base/escape(p1)/escape(p2)/...`.
#[must_use]
pub fn compose(base: &str, parts: &[&str]) -> String {
    let mut path = base.trim_end_matches('/').to_string();
    for part in parts {
        path.push('/');
        path.push_str(&escape_part(part));
    }
    path
}

/// Splits `path` below `base` into exactly `count` unescaped elements.
///
/// # Errors
///
/// Returns [`BusError::InvalidArgument`] if `path` is not below `base` or does
/// not have exactly `count` elements below it.
pub fn decompose_exact(path: &str, base: &str, count: usize) -> Result<Vec<String>, BusError> {
    let prefix = format!("{}/", base.trim_end_matches('/'));
    let Some(rest) = path.strip_prefix(&prefix) else {
        return Err(BusError::InvalidArgument(format!(
            "object path {path} is not below {base}"
        )));
    };

    let parts: Vec<String> = rest.split('/').map(unescape_part).collect();
    if parts.len() != count {
        return Err(BusError::InvalidArgument(format!(
            "object path {path} has {} elements below {base}, expected {count}",
            parts.len()
        )));
    }
    Ok(parts)
}

// ---------------------------------------------------------------------------
// ObjectPath
// ---------------------------------------------------------------------------

/// A validated object path, exact (`/a/b`) or subtree (`/a/b/*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Parses and validates an object path.
    ///
    /// # Errors
    ///
    /// See [`validate`].
    pub fn parse(path: impl Into<String>) -> Result<Self, BusError> {
        let path = path.into();
        validate(&path)?;
        Ok(Self(path))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_subtree(&self) -> bool {
        is_subtree(&self.0)
    }

    /// The path routing is claimed on: the subtree suffix stripped.
    #[must_use]
    pub fn base_path(&self) -> &str {
        base_path(&self.0)
    }

    /// The subtree path covering this path and everything below it.
    #[must_use]
    pub fn subtree(&self) -> Self {
        if self.is_subtree() {
            return self.clone();
        }
        if self.0 == ROOT {
            return Self("/*".to_string());
        }
        Self(format!("{}/*", self.0))
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ObjectPath> for String {
    fn from(path: ObjectPath) -> Self {
        path.0
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn subtree_predicate() {
        assert!(is_subtree("/org/a/*"));
        assert!(is_subtree("/*"));
        assert!(!is_subtree("/org/a"));
        assert!(!is_subtree("/"));
        assert!(!is_subtree("*"));
        assert!(!is_subtree("/org/a*"));
    }

    #[test]
    fn base_path_strips_subtree_suffix() {
        assert_eq!(base_path("/org/a/*"), "/org/a");
        assert_eq!(base_path("/*"), "/");
        assert_eq!(base_path("/org/a"), "/org/a");
        assert_eq!(base_path("/"), "/");
    }

    #[test]
    fn parent_subtree_walks_to_root() {
        assert_eq!(parent_subtree("/org/a/1").unwrap().as_deref(), Some("/org/a/*"));
        assert_eq!(parent_subtree("/org/a/*").unwrap().as_deref(), Some("/org/*"));
        assert_eq!(parent_subtree("/org/*").unwrap().as_deref(), Some("/*"));
        assert_eq!(parent_subtree("/org").unwrap().as_deref(), Some("/*"));
        assert_eq!(parent_subtree("/*").unwrap(), None);
        assert_eq!(parent_subtree("/").unwrap(), None);
    }

    #[test]
    fn parent_subtree_rejects_trailing_separator() {
        assert!(matches!(
            parent_subtree("/org/a/"),
            Err(BusError::MalformedPath(p)) if p == "/org/a/"
        ));
    }

    #[test]
    fn parent_subtree_rejects_relative_path() {
        assert!(matches!(parent_subtree("org"), Err(BusError::MalformedPath(_))));
        assert!(matches!(parent_subtree(""), Err(BusError::MalformedPath(_))));
    }

    #[test]
    fn validate_accepts_exact_subtree_and_root() {
        assert!(validate("/").is_ok());
        assert!(validate("/*").is_ok());
        assert!(validate("/org/idbus/Users").is_ok());
        assert!(validate("/org/idbus/Users/*").is_ok());
        assert!(validate("/org/idbus/Users/LDAP_2eDOM/1000").is_ok());
    }

    #[test]
    fn validate_rejects_bad_paths() {
        assert!(matches!(validate(""), Err(BusError::InvalidArgument(_))));
        assert!(matches!(validate("/org/"), Err(BusError::MalformedPath(_))));
        assert!(matches!(validate("org/a"), Err(BusError::MalformedPath(_))));
        assert!(matches!(validate("/org//a"), Err(BusError::MalformedPath(_))));
        assert!(matches!(validate("/org/*/a"), Err(BusError::MalformedPath(_))));
        assert!(matches!(validate("/org/a-b"), Err(BusError::MalformedPath(_))));
    }

    #[test]
    fn escape_non_alphanumeric_bytes() {
        assert_eq!(escape_part("ldap.dom"), "ldap_2edom");
        assert_eq!(escape_part("a_b"), "a_5fb");
        assert_eq!(escape_part(""), "_");
        assert_eq!(escape_part("abc123"), "abc123");
    }

    #[test]
    fn unescape_restores_original() {
        assert_eq!(unescape_part("ldap_2edom"), "ldap.dom");
        assert_eq!(unescape_part("a_5fb"), "a_b");
        assert_eq!(unescape_part("_"), "");
        assert_eq!(unescape_part(&escape_part("Ünïcode user@x")), "Ünïcode user@x");
    }

    #[test]
    fn unescape_invalid_sequence_is_verbatim() {
        assert_eq!(unescape_part("bad_zz"), "bad_zz");
        assert_eq!(unescape_part("tail_4"), "tail_4");
    }

    #[test]
    fn compose_and_decompose() {
        let path = compose("/org/idbus/Users", &["ldap.dom", "1000"]);
        assert_eq!(path, "/org/idbus/Users/ldap_2edom/1000");
        assert!(validate(&path).is_ok());

        let parts = decompose_exact(&path, "/org/idbus/Users", 2).unwrap();
        assert_eq!(parts, vec!["ldap.dom".to_string(), "1000".to_string()]);
    }

    #[test]
    fn decompose_rejects_wrong_shape() {
        assert!(decompose_exact("/org/other/x/1", "/org/idbus/Users", 2).is_err());
        assert!(decompose_exact("/org/idbus/Users/x", "/org/idbus/Users", 2).is_err());
        assert!(decompose_exact("/org/idbus/Users/x/1/2", "/org/idbus/Users", 2).is_err());
    }

    #[test]
    fn object_path_subtree_of_root_and_exact() {
        let root = ObjectPath::parse("/").unwrap();
        assert_eq!(root.subtree().as_str(), "/*");
        assert_eq!(root.subtree().base_path(), "/");

        let users = ObjectPath::parse("/org/idbus/Users").unwrap();
        assert_eq!(users.subtree().as_str(), "/org/idbus/Users/*");
        assert_eq!(users.subtree().base_path(), "/org/idbus/Users");
    }

    #[test]
    fn object_path_serde_validates() {
        let path: Result<ObjectPath, _> = msgpack_roundtrip("/org/a/");
        assert!(path.is_err());
        let path: Result<ObjectPath, _> = msgpack_roundtrip("/org/a");
        assert_eq!(path.unwrap().as_str(), "/org/a");
    }

    fn msgpack_roundtrip(raw: &str) -> Result<ObjectPath, rmp_serde::decode::Error> {
        let bytes = rmp_serde::to_vec(raw).unwrap();
        rmp_serde::from_slice(&bytes)
    }

    fn element() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_]{1,8}"
    }

    proptest! {
        #[test]
        fn parent_walk_terminates_within_segment_count(
            segments in proptest::collection::vec(element(), 0..10),
            subtree in any::<bool>(),
        ) {
            let mut path = format!("/{}", segments.join("/"));
            if subtree {
                path = if path == "/" { "/*".to_string() } else { format!("{path}/*") };
            }
            let segment_count = path.split('/').filter(|s| !s.is_empty()).count();

            let mut steps = 0;
            let mut current = path.clone();
            while let Some(parent) = parent_subtree(&current).unwrap() {
                prop_assert!(base_path(&parent).len() < base_path(&current).len());
                steps += 1;
                prop_assert!(steps <= segment_count);
                current = parent;
            }
        }

        #[test]
        fn escape_roundtrip_yields_valid_element(raw in ".{0,16}") {
            let escaped = escape_part(&raw);
            let element_path = format!("/{escaped}");
            prop_assert!(validate(&element_path).is_ok());
            prop_assert_eq!(unescape_part(&escaped), raw);
        }
    }
}
