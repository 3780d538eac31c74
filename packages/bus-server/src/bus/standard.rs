//! Standard interfaces every object path carries.
//!
//! `Introspectable` describes the interfaces visible at the requested path and
//! `Properties` reads properties of any interface visible there. Both are
//! registered on each new path key and look the target up at call time, so
//! one registration on a subtree key serves every path below it.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Weak};

use idbus_core::{error_names, BusError, MethodError, PropertyValue};
use serde::{Deserialize, Serialize};

use super::connection::{BusConnection, Shared};
use super::interface::{CallContext, InterfaceVTable, MethodDescriptor, RegisteredInterface};

pub const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";
pub const PROPERTIES: &str = "org.freedesktop.DBus.Properties";

/// Structured introspection result for one object path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionData {
    pub path: String,
    pub interfaces: Vec<InterfaceDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    pub name: String,
    pub methods: Vec<String>,
    pub properties: Vec<String>,
}

impl InterfaceDescription {
    fn describe(iface: &RegisteredInterface) -> Self {
        let vtable = iface.vtable();
        Self {
            name: vtable.name().to_string(),
            methods: vtable.methods().map(|m| m.name().to_string()).collect(),
            properties: vtable.properties().map(|p| p.name().to_string()).collect(),
        }
    }
}

/// Instance data of the standard interfaces.
struct StandardContext {
    link: Weak<Shared>,
}

impl StandardContext {
    fn shared(&self) -> Result<Arc<Shared>, MethodError> {
        self.link
            .upgrade()
            .ok_or_else(|| MethodError::failed("The connection is closed"))
    }

    fn target(
        &self,
        call: &CallContext,
        interface: &str,
    ) -> Result<Arc<RegisteredInterface>, MethodError> {
        let shared = self.shared()?;
        let found = shared.table.read().lookup_interface(&call.path, interface);
        found.ok_or_else(|| {
            MethodError::new(
                error_names::UNKNOWN_INTERFACE,
                format!("Unknown interface {interface} at {}", call.path),
            )
        })
    }
}

static INTROSPECTABLE_VTABLE: LazyLock<Arc<InterfaceVTable>> = LazyLock::new(|| {
    InterfaceVTable::builder(INTROSPECTABLE)
        .method(MethodDescriptor::no_args(
            "Introspect",
            |call, ctx: Arc<StandardContext>| async move {
                let shared = ctx.shared()?;
                let interfaces = shared
                    .table
                    .read()
                    .lookup_all_supported(&call.path)
                    .iter()
                    .map(|iface| InterfaceDescription::describe(iface))
                    .collect();
                Ok(IntrospectionData {
                    path: call.path,
                    interfaces,
                })
            },
        ))
        .build()
});

static PROPERTIES_VTABLE: LazyLock<Arc<InterfaceVTable>> = LazyLock::new(|| {
    InterfaceVTable::builder(PROPERTIES)
        .method(MethodDescriptor::new(
            "Get",
            |call, ctx: Arc<StandardContext>, (interface, property): (String, String)| async move {
                let target = ctx.target(&call, &interface)?;
                let Some(descriptor) = target.vtable().find_property(&property) else {
                    return Err(unknown_property(&interface, &property));
                };
                let getter = Arc::clone(descriptor.getter());
                getter
                    .get(call.for_interface(&interface), Arc::clone(target.instance()))
                    .await
            },
        ))
        .method(MethodDescriptor::new(
            "GetAll",
            |call, ctx: Arc<StandardContext>, (interface,): (String,)| async move {
                let target = ctx.target(&call, &interface)?;
                let call = call.for_interface(&interface);
                let mut values: BTreeMap<String, PropertyValue> = BTreeMap::new();
                for descriptor in target.vtable().properties() {
                    let value = descriptor
                        .getter()
                        .get(call.clone(), Arc::clone(target.instance()))
                        .await?;
                    values.insert(descriptor.name().to_string(), value);
                }
                Ok(values)
            },
        ))
        .build()
});

fn unknown_property(interface: &str, property: &str) -> MethodError {
    MethodError::new(
        error_names::UNKNOWN_PROPERTY,
        format!("Unknown property {property} on interface {interface}"),
    )
}

/// Registers the standard interfaces on `path`, skipping those already there.
pub(crate) fn register_standard_interfaces(conn: &BusConnection, path: &str) -> Result<(), BusError> {
    for vtable in [&*INTROSPECTABLE_VTABLE, &*PROPERTIES_VTABLE] {
        if conn.shared.table.read().contains_interface(path, vtable.name()) {
            continue;
        }
        let context = Arc::new(StandardContext {
            link: Arc::downgrade(&conn.shared),
        });
        conn.register_instance(Arc::clone(vtable), path, context)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use idbus_core::Message;

    use super::*;
    use crate::bus::interface::PropertyDescriptor;
    use crate::bus::test_support::{harness, recv_reply, Harness, StubResolver};

    struct Item {
        label: &'static str,
        size: u32,
    }

    fn item_harness() -> Harness {
        let h = harness(StubResolver::uid(0));
        let vtable = InterfaceVTable::builder("org.example.Item")
            .method(MethodDescriptor::declared("Touch"))
            .property(PropertyDescriptor::new("Label", |_call, item: Arc<Item>| async move {
                PropertyValue::String(item.label.to_string())
            }))
            .property(PropertyDescriptor::new("Size", |_call, item: Arc<Item>| async move {
                PropertyValue::U32(item.size)
            }))
            .property(PropertyDescriptor::new("Path", |call, _item: Arc<Item>| async move {
                PropertyValue::ObjectPath(call.path)
            }))
            .build();
        h.conn
            .register_interface(
                vtable,
                "/org/example/items/*",
                Arc::new(Item {
                    label: "box",
                    size: 3,
                }),
            )
            .unwrap();
        h
    }

    #[test]
    fn cascade_skips_interfaces_already_present() {
        let h = item_harness();
        register_standard_interfaces(&h.conn, "/org/example/items/*").unwrap();
        let supported = h.conn.lookup_supported("/org/example/items/*");
        assert_eq!(supported.len(), 3);
    }

    #[tokio::test]
    async fn introspect_lists_visible_interfaces() {
        let mut h = item_harness();
        let message = Message::method_call("/org/example/items/4", INTROSPECTABLE, "Introspect");
        h.conn.handle_message(message);

        let reply = recv_reply(&mut h.outbound).await;
        let data: IntrospectionData = reply.decode_body().unwrap();
        assert_eq!(data.path, "/org/example/items/4");
        let names: Vec<&str> = data.interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["org.example.Item", INTROSPECTABLE, PROPERTIES]);
        assert_eq!(data.interfaces[0].methods, vec!["Touch"]);
        assert_eq!(data.interfaces[0].properties, vec!["Label", "Size", "Path"]);
    }

    #[tokio::test]
    async fn get_reads_one_property_at_the_requested_path() {
        let mut h = item_harness();
        let message = Message::method_call("/org/example/items/4", PROPERTIES, "Get")
            .with_args(&("org.example.Item", "Path"))
            .unwrap();
        h.conn.handle_message(message);

        let reply = recv_reply(&mut h.outbound).await;
        let value: PropertyValue = reply.decode_body().unwrap();
        assert_eq!(value, PropertyValue::ObjectPath("/org/example/items/4".to_string()));
    }

    #[tokio::test]
    async fn get_all_collects_every_property() {
        let mut h = item_harness();
        let message = Message::method_call("/org/example/items/4", PROPERTIES, "GetAll")
            .with_args(&("org.example.Item",))
            .unwrap();
        h.conn.handle_message(message);

        let reply = recv_reply(&mut h.outbound).await;
        let values: BTreeMap<String, PropertyValue> = reply.decode_body().unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values["Label"], PropertyValue::String("box".to_string()));
        assert_eq!(values["Size"], PropertyValue::U32(3));
    }

    #[tokio::test]
    async fn unknown_interface_and_property_errors() {
        let mut h = item_harness();

        let message = Message::method_call("/org/example/items/4", PROPERTIES, "Get")
            .with_args(&("org.example.Nope", "Label"))
            .unwrap();
        h.conn.handle_message(message);
        let reply = recv_reply(&mut h.outbound).await;
        assert_eq!(reply.error_name.as_deref(), Some(error_names::UNKNOWN_INTERFACE));

        let message = Message::method_call("/org/example/items/4", PROPERTIES, "Get")
            .with_args(&("org.example.Item", "Colour"))
            .unwrap();
        h.conn.handle_message(message);
        let reply = recv_reply(&mut h.outbound).await;
        assert_eq!(reply.error_name.as_deref(), Some(error_names::UNKNOWN_PROPERTY));
    }
}
