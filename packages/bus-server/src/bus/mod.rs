//! Object-path registration and method dispatch for one bus link.
//!
//! - [`path_table`]: path key to registered interfaces, with subtree walk-up
//! - [`interface`]: method and property tables, typed invokers
//! - [`connection`]: registration facade, path claiming, teardown
//! - [`dispatch`]: inbound message routing
//! - [`request`]: caller resolution and invocation of one request
//! - [`standard`]: introspection and property access on every path
//! - [`local`]: in-process transport

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod interface;
pub mod lifecycle;
pub mod local;
pub mod middleware;
pub mod path_table;
pub mod request;
pub mod standard;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::BusConfig;
pub use connection::{BusConnection, HandlerResult};
pub use interface::{
    CallContext, InstanceData, InterfaceVTable, MethodDescriptor, PropertyDescriptor,
    RegisteredInterface,
};
pub use lifecycle::{LinkController, LinkState};
pub use local::{ClaimKind, LocalTransport};
pub use path_table::{AddOutcome, PathTable};
pub use request::RequestState;
pub use standard::{InterfaceDescription, IntrospectionData, INTROSPECTABLE, PROPERTIES};
