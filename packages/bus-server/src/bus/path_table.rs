//! Object-path table: path key to the interfaces registered under it.
//!
//! Keys are either exact paths or subtree paths (`/org/a/*`). Lookups start at
//! the requested path and walk up through the parent subtree patterns, so a
//! subtree registration answers for every path below its base.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use idbus_core::path::{base_path, parent_subtree};
use idbus_core::{BusError, Transport};
use tracing::{debug, warn};

use super::interface::RegisteredInterface;

/// Whether [`PathTable::add`] created the path key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The key is new; the caller must claim routing for it.
    Inserted,
    /// The key already existed; the interface joined its list.
    Known,
}

/// Path key to ordered list of registered interfaces.
#[derive(Debug, Default)]
pub struct PathTable {
    entries: HashMap<String, Vec<Arc<RegisteredInterface>>>,
}

impl PathTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `iface` under its path key.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateInterface`] if an interface with the same
    /// name is already registered under exactly this key.
    pub fn add(&mut self, iface: Arc<RegisteredInterface>) -> Result<AddOutcome, BusError> {
        let key = iface.path().as_str();

        if let Some(list) = self.entries.get_mut(key) {
            if list.iter().any(|existing| existing.name() == iface.name()) {
                return Err(BusError::DuplicateInterface {
                    interface: iface.name().to_string(),
                    path: key.to_string(),
                });
            }
            list.push(iface);
            return Ok(AddOutcome::Known);
        }

        self.entries.insert(key.to_string(), vec![iface]);
        Ok(AddOutcome::Inserted)
    }

    /// Finds `interface` at `path` or the closest ancestor subtree.
    #[must_use]
    pub fn lookup_interface(&self, path: &str, interface: &str) -> Option<Arc<RegisteredInterface>> {
        WalkUp::new(path)
            .filter_map(|key| self.entries.get(&key))
            .find_map(|list| list.iter().find(|iface| iface.name() == interface))
            .cloned()
    }

    /// Collects every interface visible at `path`, closest registration first.
    ///
    /// An interface name seen at a closer level hides the same name further up.
    #[must_use]
    pub fn lookup_all_supported(&self, path: &str) -> Vec<Arc<RegisteredInterface>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for key in WalkUp::new(path) {
            let Some(list) = self.entries.get(&key) else {
                continue;
            };
            for iface in list {
                if seen.insert(iface.name().to_string()) {
                    found.push(Arc::clone(iface));
                }
            }
        }

        found
    }

    /// Whether `path` is itself a key, without walking up.
    #[must_use]
    pub fn has_exact_path(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Whether `interface` is registered under exactly the key `path`.
    #[must_use]
    pub fn contains_interface(&self, path: &str, interface: &str) -> bool {
        self.entries
            .get(path)
            .is_some_and(|list| list.iter().any(|iface| iface.name() == interface))
    }

    /// All path keys, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discards the table, releasing each key's base path with the transport
    /// once.
    pub fn teardown(self, transport: &dyn Transport) {
        for key in self.entries.keys() {
            let base = base_path(key);
            debug!(path = %key, base = %base, "releasing object path");
            transport.release_path(base);
        }
    }
}

/// Iterates a path followed by its ancestor subtree patterns.
///
/// A malformed path ends the walk with a warning.
struct WalkUp {
    next: Option<String>,
}

impl WalkUp {
    fn new(path: &str) -> Self {
        Self {
            next: Some(path.to_string()),
        }
    }
}

impl Iterator for WalkUp {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let current = self.next.take()?;
        self.next = match parent_subtree(&current) {
            Ok(parent) => parent,
            Err(err) => {
                warn!(path = %current, error = %err, "stopping object path walk");
                None
            }
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use idbus_core::ObjectPath;
    use proptest::prelude::*;

    use super::*;
    use crate::bus::interface::{InstanceData, InterfaceVTable};
    use crate::bus::local::LocalTransport;

    fn registered(path: &str, name: &str) -> Arc<RegisteredInterface> {
        let instance: InstanceData = Arc::new(());
        Arc::new(RegisteredInterface::new(
            ObjectPath::parse(path).unwrap(),
            InterfaceVTable::builder(name).build(),
            instance,
        ))
    }

    fn names(list: &[Arc<RegisteredInterface>]) -> Vec<(String, String)> {
        list.iter()
            .map(|iface| (iface.path().to_string(), iface.name().to_string()))
            .collect()
    }

    #[test]
    fn add_reports_new_and_known_keys() {
        let mut table = PathTable::new();
        assert_eq!(table.add(registered("/org/a", "org.X")).unwrap(), AddOutcome::Inserted);
        assert_eq!(table.add(registered("/org/a", "org.Y")).unwrap(), AddOutcome::Known);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicate_interface_at_same_key_is_rejected() {
        let mut table = PathTable::new();
        table.add(registered("/org/a", "org.X")).unwrap();
        let err = table.add(registered("/org/a", "org.X")).unwrap_err();
        assert_eq!(
            err,
            BusError::DuplicateInterface {
                interface: "org.X".to_string(),
                path: "/org/a".to_string(),
            }
        );
    }

    #[test]
    fn same_interface_on_exact_and_ancestor_subtree_is_allowed() {
        let mut table = PathTable::new();
        table.add(registered("/org/a/*", "org.X")).unwrap();
        table.add(registered("/org/a/1", "org.X")).unwrap();

        let hit = table.lookup_interface("/org/a/1", "org.X").unwrap();
        assert_eq!(hit.path().as_str(), "/org/a/1");
        let hit = table.lookup_interface("/org/a/2", "org.X").unwrap();
        assert_eq!(hit.path().as_str(), "/org/a/*");
    }

    #[test]
    fn lookup_walks_up_to_subtree_registration() {
        let mut table = PathTable::new();
        table.add(registered("/org/a/*", "org.X")).unwrap();

        let hit = table.lookup_interface("/org/a/1/2", "org.X").unwrap();
        assert_eq!(hit.path().as_str(), "/org/a/*");
        assert!(table.lookup_interface("/org/a/1", "org.Missing").is_none());
        assert!(table.lookup_interface("/org/b", "org.X").is_none());
    }

    #[test]
    fn subtree_answers_for_its_own_base_path() {
        let mut table = PathTable::new();
        table.add(registered("/org/a/*", "org.X")).unwrap();

        // "/org/a" walks to "/org/*", not "/org/a/*".
        assert!(table.lookup_interface("/org/a", "org.X").is_none());
        assert!(table.lookup_interface("/org/a/*", "org.X").is_some());
    }

    #[test]
    fn root_subtree_answers_for_everything() {
        let mut table = PathTable::new();
        table.add(registered("/*", "org.Root")).unwrap();
        assert!(table.lookup_interface("/any/depth/here", "org.Root").is_some());
        assert!(table.lookup_interface("/", "org.Root").is_none());
    }

    #[test]
    fn malformed_path_is_a_lookup_miss() {
        let mut table = PathTable::new();
        table.add(registered("/*", "org.Root")).unwrap();
        assert!(table.lookup_interface("/org/a/", "org.Root").is_none());
        assert!(table.lookup_interface("relative", "org.Root").is_none());
    }

    #[test]
    fn lookup_all_supported_dedups_by_name_closest_first() {
        let mut table = PathTable::new();
        table.add(registered("/org/*", "org.X")).unwrap();
        table.add(registered("/org/*", "org.Z")).unwrap();
        table.add(registered("/org/a/*", "org.X")).unwrap();
        table.add(registered("/org/a/1", "org.Y")).unwrap();

        let all = table.lookup_all_supported("/org/a/1");
        assert_eq!(
            names(&all),
            vec![
                ("/org/a/1".to_string(), "org.Y".to_string()),
                ("/org/a/*".to_string(), "org.X".to_string()),
                ("/org/*".to_string(), "org.Z".to_string()),
            ]
        );
    }

    #[test]
    fn two_interfaces_at_one_path_are_both_supported() {
        let mut table = PathTable::new();
        table.add(registered("/org/a", "org.X")).unwrap();
        table.add(registered("/org/a", "org.Y")).unwrap();

        let all = table.lookup_all_supported("/org/a");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name(), "org.X");
        assert_eq!(all[1].name(), "org.Y");
    }

    #[test]
    fn has_exact_path_does_not_walk() {
        let mut table = PathTable::new();
        table.add(registered("/org/a/*", "org.X")).unwrap();
        assert!(table.has_exact_path("/org/a/*"));
        assert!(!table.has_exact_path("/org/a/1"));
        assert!(!table.has_exact_path("/org/a"));
        assert!(table.contains_interface("/org/a/*", "org.X"));
        assert!(!table.contains_interface("/org/a/*", "org.Y"));
    }

    #[test]
    fn teardown_releases_each_base_path_once() {
        let mut table = PathTable::new();
        table.add(registered("/org/a/*", "org.X")).unwrap();
        table.add(registered("/org/a/*", "org.Y")).unwrap();
        table.add(registered("/org/b", "org.X")).unwrap();
        table.add(registered("/*", "org.X")).unwrap();

        let (transport, _outbound) = LocalTransport::new();
        table.teardown(transport.as_ref());

        let mut released = transport.releases();
        released.sort();
        assert_eq!(released, vec!["/", "/org/a", "/org/b"]);
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z0-9_]{1,6}"
    }

    proptest! {
        #[test]
        fn subtree_registration_resolves_every_descendant(
            base in prop::collection::vec(segment(), 1..4),
            tail in prop::collection::vec(segment(), 1..4),
        ) {
            let base_path = format!("/{}", base.join("/"));
            let mut table = PathTable::new();
            table.add(registered(&format!("{base_path}/*"), "org.X")).unwrap();

            let request = format!("{base_path}/{}", tail.join("/"));
            let hit = table.lookup_interface(&request, "org.X");
            prop_assert!(hit.is_some());
            let hit = hit.unwrap();
            let expected = format!("{base_path}/*");
            prop_assert_eq!(hit.path().as_str(), expected.as_str());
        }
    }
}
