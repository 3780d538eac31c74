//! Interface method tables and their registrations.
//!
//! An interface is a named table of methods and properties. Methods are
//! resolved by name at routing time; each carries an [`Invoker`] that decodes
//! the request body into the handler's argument type, downcasts the
//! registration's instance data, and encodes the handler's reply.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use idbus_core::{decode_body, encode_body, CallerIdentity, MethodError, ObjectPath, PropertyValue};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;

/// Opaque data supplied by the registering subsystem, handed to every handler.
pub type InstanceData = Arc<dyn Any + Send + Sync>;

/// Future returned by an invoker: the encoded reply body or a bus error.
pub type InvokeFuture = Pin<Box<dyn Future<Output = Result<Bytes, MethodError>> + Send>>;

/// Future returned by a property getter.
pub type PropertyFuture = Pin<Box<dyn Future<Output = Result<PropertyValue, MethodError>> + Send>>;

// ---------------------------------------------------------------------------
// CallContext
// ---------------------------------------------------------------------------

/// Everything a handler knows about the request it is serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub request_id: u64,
    /// Object path the request was addressed to (never a subtree pattern).
    pub path: String,
    pub interface: String,
    pub member: String,
    pub sender: Option<String>,
    pub caller: CallerIdentity,
}

impl CallContext {
    /// The same call, seen from another interface on the same object.
    #[must_use]
    pub fn for_interface(&self, interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Type-erased method handler plus its argument unmarshalling.
pub trait Invoker: Send + Sync {
    fn invoke(&self, call: CallContext, instance: InstanceData, body: Bytes) -> InvokeFuture;
}

fn downcast_instance<T: Any + Send + Sync>(
    instance: InstanceData,
    call: &CallContext,
) -> Result<Arc<T>, MethodError> {
    instance.downcast::<T>().map_err(|_| {
        MethodError::internal(format!(
            "instance data registered for {} has an unexpected type",
            call.interface
        ))
    })
}

struct TypedInvoker<T, A, R, F> {
    handler: F,
    _marker: PhantomData<fn(Arc<T>, A) -> R>,
}

impl<T, A, R, F, Fut> Invoker for TypedInvoker<T, A, R, F>
where
    T: Any + Send + Sync,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(CallContext, Arc<T>, A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
{
    fn invoke(&self, call: CallContext, instance: InstanceData, body: Bytes) -> InvokeFuture {
        let data = match downcast_instance::<T>(instance, &call) {
            Ok(data) => data,
            Err(err) => return Box::pin(async move { Err(err) }),
        };

        let args: A = match decode_body(&body) {
            Ok(args) => args,
            Err(err) => {
                let err = MethodError::invalid_args(format!(
                    "invalid arguments for {}.{}: {err}",
                    call.interface, call.member
                ));
                return Box::pin(async move { Err(err) });
            }
        };

        let fut = (self.handler)(call, data, args);
        Box::pin(async move {
            let reply = fut.await?;
            encode_body(&reply)
                .map_err(|err| MethodError::internal(format!("failed to encode reply: {err}")))
        })
    }
}

// ---------------------------------------------------------------------------
// MethodDescriptor
// ---------------------------------------------------------------------------

/// A method entry in an interface table.
///
/// A method may be declared without a handler; requests for it are answered
/// with an unknown-method error.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    invoker: Option<Arc<dyn Invoker>>,
}

impl MethodDescriptor {
    /// Declares a method whose arguments decode into `A`.
    pub fn new<T, A, R, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        T: Any + Send + Sync,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(CallContext, Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            invoker: Some(Arc::new(TypedInvoker {
                handler,
                _marker: PhantomData,
            })),
        }
    }

    /// Declares a method that ignores its arguments.
    pub fn no_args<T, R, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        T: Any + Send + Sync,
        R: Serialize + Send + 'static,
        F: Fn(CallContext, Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        Self::new(name, move |call, data: Arc<T>, _: IgnoredAny| handler(call, data))
    }

    /// Declares a method with no handler installed.
    pub fn declared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            invoker: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn invoker(&self) -> Option<&Arc<dyn Invoker>> {
        self.invoker.as_ref()
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("has_handler", &self.invoker.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Type-erased property getter.
pub trait PropertyGetter: Send + Sync {
    fn get(&self, call: CallContext, instance: InstanceData) -> PropertyFuture;
}

struct TypedGetter<T, F> {
    getter: F,
    _marker: PhantomData<fn(Arc<T>)>,
}

impl<T, F, Fut> PropertyGetter for TypedGetter<T, F>
where
    T: Any + Send + Sync,
    F: Fn(CallContext, Arc<T>) -> Fut + Send + Sync,
    Fut: Future<Output = PropertyValue> + Send + 'static,
{
    fn get(&self, call: CallContext, instance: InstanceData) -> PropertyFuture {
        match downcast_instance::<T>(instance, &call) {
            Ok(data) => {
                let fut = (self.getter)(call, data);
                Box::pin(async move { Ok(fut.await) })
            }
            Err(err) => Box::pin(async move { Err(err) }),
        }
    }
}

/// A read-only property entry in an interface table.
#[derive(Clone)]
pub struct PropertyDescriptor {
    name: String,
    getter: Arc<dyn PropertyGetter>,
}

impl PropertyDescriptor {
    pub fn new<T, F, Fut>(name: impl Into<String>, getter: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(CallContext, Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PropertyValue> + Send + 'static,
    {
        Self {
            name: name.into(),
            getter: Arc::new(TypedGetter {
                getter,
                _marker: PhantomData,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn getter(&self) -> &Arc<dyn PropertyGetter> {
        &self.getter
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// InterfaceVTable
// ---------------------------------------------------------------------------

/// A named interface: its method table and property table.
#[derive(Debug)]
pub struct InterfaceVTable {
    name: String,
    methods: Vec<MethodDescriptor>,
    properties: Vec<PropertyDescriptor>,
}

impl InterfaceVTable {
    pub fn builder(name: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder {
            vtable: Self {
                name: name.into(),
                methods: Vec::new(),
                properties: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn find_method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|method| method.name == name)
    }

    #[must_use]
    pub fn find_property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|property| property.name == name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.iter()
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter()
    }
}

/// Builder for [`InterfaceVTable`].
#[derive(Debug)]
pub struct InterfaceBuilder {
    vtable: InterfaceVTable,
}

impl InterfaceBuilder {
    #[must_use]
    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.vtable.methods.push(method);
        self
    }

    #[must_use]
    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.vtable.properties.push(property);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<InterfaceVTable> {
        Arc::new(self.vtable)
    }
}

// ---------------------------------------------------------------------------
// RegisteredInterface
// ---------------------------------------------------------------------------

/// One interface bound to one object-path key, with its instance data.
pub struct RegisteredInterface {
    path: ObjectPath,
    vtable: Arc<InterfaceVTable>,
    instance: InstanceData,
}

impl RegisteredInterface {
    #[must_use]
    pub fn new(path: ObjectPath, vtable: Arc<InterfaceVTable>, instance: InstanceData) -> Self {
        Self {
            path,
            vtable,
            instance,
        }
    }

    /// The key this interface was registered under (exact or subtree).
    #[must_use]
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.vtable.name()
    }

    #[must_use]
    pub fn vtable(&self) -> &Arc<InterfaceVTable> {
        &self.vtable
    }

    #[must_use]
    pub fn instance(&self) -> &InstanceData {
        &self.instance
    }
}

impl fmt::Debug for RegisteredInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredInterface")
            .field("path", &self.path)
            .field("interface", &self.vtable.name)
            .finish_non_exhaustive()
    }
}
