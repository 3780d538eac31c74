//! Bus message model.
//!
//! The wire framing belongs to the transport; the dispatcher only needs the
//! routing header fields and an opaque body. Bodies are `MsgPack` documents
//! encoded with `rmp-serde` (named fields), and method arguments are encoded
//! as a tuple so each method's invoker can decode its own signature.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::MethodError;

/// Body used when a message carries no arguments: an empty `MsgPack` array.
const EMPTY_ARGS: &[u8] = &[0x90];

/// Message type as carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    MethodCall,
    MethodReturn,
    Error,
    Signal,
}

/// A bus message: routing header plus encoded body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    /// Sender-assigned serial, echoed as `reply_serial` in replies.
    pub serial: u32,
    pub reply_serial: Option<u32>,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    /// Unique bus name of the sending peer.
    pub sender: Option<String>,
    pub destination: Option<String>,
    /// Set on [`MessageKind::Error`] messages only.
    pub error_name: Option<String>,
    pub body: Bytes,
}

impl Message {
    /// Creates a method call with an empty body.
    pub fn method_call(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::MethodCall,
            serial: 0,
            reply_serial: None,
            path: Some(path.into()),
            interface: Some(interface.into()),
            member: Some(member.into()),
            sender: None,
            destination: None,
            error_name: None,
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }

    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Encodes `args` as the message body.
    ///
    /// # Errors
    ///
    /// Returns an error if `args` cannot be serialized.
    pub fn with_args<T: Serialize + ?Sized>(
        mut self,
        args: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        self.body = encode_body(args)?;
        Ok(self)
    }

    /// Builds a successful reply to this message.
    #[must_use]
    pub fn method_return(&self, body: Bytes) -> Self {
        Self {
            kind: MessageKind::MethodReturn,
            serial: 0,
            reply_serial: Some(self.serial),
            path: None,
            interface: None,
            member: None,
            sender: None,
            destination: self.sender.clone(),
            error_name: None,
            body,
        }
    }

    /// Builds an error reply to this message. The body carries the description.
    #[must_use]
    pub fn error_reply(&self, error: &MethodError) -> Self {
        Self {
            kind: MessageKind::Error,
            serial: 0,
            reply_serial: Some(self.serial),
            path: None,
            interface: None,
            member: None,
            sender: None,
            destination: self.sender.clone(),
            error_name: Some(error.name.clone()),
            body: encode_body(&error.message).unwrap_or_default(),
        }
    }

    /// Decodes the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not match `T`.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, rmp_serde::decode::Error> {
        decode_body(&self.body)
    }

    /// For error messages, reassembles the structured error.
    #[must_use]
    pub fn error(&self) -> Option<MethodError> {
        if self.kind != MessageKind::Error {
            return None;
        }
        let name = self.error_name.clone()?;
        let message = self.decode_body::<String>().unwrap_or_default();
        Some(MethodError { name, message })
    }
}

/// Encodes a value as a message body.
///
/// # Errors
///
/// Returns an error if `value` cannot be serialized.
pub fn encode_body<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(value).map(Bytes::from)
}

/// Decodes a message body. An empty body decodes as an empty argument list.
///
/// # Errors
///
/// Returns an error if the body does not match `T`.
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, rmp_serde::decode::Error> {
    if body.is_empty() {
        rmp_serde::from_slice(EMPTY_ARGS)
    } else {
        rmp_serde::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_names;

    #[test]
    fn method_call_args_decode_as_tuple() {
        let msg = Message::method_call("/org/a", "org.a.Iface", "Find")
            .with_args(&("alice", 42u32))
            .unwrap();
        let (name, id): (String, u32) = msg.decode_body().unwrap();
        assert_eq!(name, "alice");
        assert_eq!(id, 42);
    }

    #[test]
    fn empty_body_decodes_as_no_arguments() {
        let msg = Message::method_call("/org/a", "org.a.Iface", "Ping");
        let args: Vec<String> = msg.decode_body().unwrap();
        assert!(args.is_empty());
    }

    #[test]
    fn reply_targets_sender_and_echoes_serial() {
        let msg = Message::method_call("/org/a", "org.a.Iface", "Ping")
            .with_serial(7)
            .with_sender(":1.42");
        let reply = msg.method_return(Bytes::new());
        assert_eq!(reply.kind, MessageKind::MethodReturn);
        assert_eq!(reply.reply_serial, Some(7));
        assert_eq!(reply.destination.as_deref(), Some(":1.42"));
    }

    #[test]
    fn error_reply_carries_name_and_description() {
        let msg = Message::method_call("/org/a", "org.a.Iface", "Ping").with_serial(3);
        let reply = msg.error_reply(&MethodError::failed("boom"));
        assert_eq!(reply.kind, MessageKind::Error);
        assert_eq!(reply.error_name.as_deref(), Some(error_names::FAILED));

        let err = reply.error().unwrap();
        assert_eq!(err.name, error_names::FAILED);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn error_accessor_is_none_for_returns() {
        let msg = Message::method_call("/org/a", "org.a.Iface", "Ping");
        assert!(msg.method_return(Bytes::new()).error().is_none());
    }
}
