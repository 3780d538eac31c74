//! Error kinds for registration and dispatch, and the structured bus error
//! that is replied to remote callers.

use serde::{Deserialize, Serialize};

/// Well-known bus error names used in error replies.
pub mod error_names {
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    pub const NO_MEMORY: &str = "org.freedesktop.DBus.Error.NoMemory";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    pub const TIMEOUT: &str = "org.freedesktop.DBus.Error.Timeout";
    pub const NOT_FOUND: &str = "org.idbus.Error.NotFound";
    pub const INTERNAL: &str = "org.idbus.Error.Internal";
}

/// Errors produced by the registry and the dispatcher.
///
/// Registration-time variants are returned to the registering subsystem.
/// Dispatch-time variants are never fatal: they are converted into a
/// [`MethodError`] and replied to the remote caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("interface {interface} is already registered at {path}")]
    DuplicateInterface { interface: String, path: String },
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("no method {member} in interface {interface} at object path {path}")]
    UnknownMethod {
        interface: String,
        member: String,
        path: String,
    },
    #[error("failed to resolve caller's ID: {0}")]
    CallerResolutionFailed(String),
    #[error("malformed object path: {0}")]
    MalformedPath(String),
}

impl BusError {
    /// Bus error name used when this error is replied to a caller.
    #[must_use]
    pub fn error_name(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) | Self::MalformedPath(_) => error_names::INVALID_ARGS,
            Self::ResourceExhausted(_) => error_names::NO_MEMORY,
            Self::UnknownMethod { .. } => error_names::UNKNOWN_METHOD,
            Self::DuplicateInterface { .. } | Self::CallerResolutionFailed(_) => {
                error_names::FAILED
            }
        }
    }
}

/// A structured bus error: an error name plus a human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct MethodError {
    pub name: String,
    pub message: String,
}

impl MethodError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(error_names::FAILED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(error_names::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(error_names::INTERNAL, message)
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(error_names::INVALID_ARGS, message)
    }

    #[must_use]
    pub fn no_memory() -> Self {
        Self::new(error_names::NO_MEMORY, "Not enough resources to handle the request")
    }
}

impl From<BusError> for MethodError {
    fn from(err: BusError) -> Self {
        Self::new(err.error_name(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_method_names_member_and_interface() {
        let err = BusError::UnknownMethod {
            interface: "org.example.Iface".to_string(),
            member: "Frob".to_string(),
            path: "/org/example".to_string(),
        };
        let method_err = MethodError::from(err);
        assert_eq!(method_err.name, error_names::UNKNOWN_METHOD);
        assert!(method_err.message.contains("Frob"));
        assert!(method_err.message.contains("org.example.Iface"));
    }

    #[test]
    fn caller_resolution_maps_to_generic_failure() {
        let err = BusError::CallerResolutionFailed("no such peer".to_string());
        assert_eq!(err.error_name(), error_names::FAILED);
        assert_eq!(err.to_string(), "failed to resolve caller's ID: no such peer");
    }

    #[test]
    fn malformed_path_is_invalid_args() {
        let err = BusError::MalformedPath("/org/".to_string());
        assert_eq!(err.error_name(), error_names::INVALID_ARGS);
    }

    #[test]
    fn method_error_display() {
        let err = MethodError::not_found("User not found");
        assert_eq!(err.to_string(), "org.idbus.Error.NotFound: User not found");
    }
}
