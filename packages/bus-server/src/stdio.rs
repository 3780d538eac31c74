//! JSON-lines front end for driving a connection from a pipe.
//!
//! Each input line is one method call:
//!
//! ```json
//! {"serial": 7, "path": "/org/idbus/Users", "interface": "org.idbus.Users",
//!  "member": "FindByName", "sender": ":1.5", "uid": 1000, "args": ["alice"]}
//! ```
//!
//! `uid` (with optional `pid`) records the sender's credentials before the
//! call is delivered. Replies are written back one JSON object per line.

use idbus_core::{CallerIdentity, Message, MessageKind};
use serde::Deserialize;
use serde_json::{json, Value};

/// One inbound call as read from the pipe.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallLine {
    #[serde(default)]
    pub serial: u32,
    pub path: String,
    pub interface: String,
    pub member: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub args: Option<Value>,
}

impl CallLine {
    /// Parses one input line.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a call object.
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Credentials to record for the sender, if the line carries both.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, CallerIdentity)> {
        let sender = self.sender.as_deref()?;
        let uid = self.uid?;
        Some((sender, CallerIdentity { uid, pid: self.pid }))
    }

    /// Builds the bus message for this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments cannot be encoded.
    pub fn into_message(self) -> anyhow::Result<Message> {
        let mut message = Message::method_call(self.path, self.interface, self.member)
            .with_serial(self.serial);
        if let Some(sender) = self.sender {
            message = message.with_sender(sender);
        }
        if let Some(args) = self.args {
            message = message.with_args(&args)?;
        }
        Ok(message)
    }
}

/// Renders an outbound message as one JSON object.
#[must_use]
pub fn render_reply(message: &Message) -> Value {
    if let Some(error) = message.error() {
        return json!({
            "reply_serial": message.reply_serial,
            "error": error.name,
            "message": error.message,
        });
    }

    let body = if message.body.is_empty() {
        Value::Null
    } else {
        rmp_serde::from_slice::<Value>(&message.body)
            .unwrap_or_else(|err| json!({ "undecodable": err.to_string() }))
    };
    let kind = match message.kind {
        MessageKind::MethodReturn => "return",
        MessageKind::Signal => "signal",
        MessageKind::MethodCall => "call",
        MessageKind::Error => "error",
    };
    json!({
        "reply_serial": message.reply_serial,
        "kind": kind,
        "body": body,
    })
}

#[cfg(test)]
mod tests {
    use idbus_core::{encode_body, MethodError};

    use super::*;

    #[test]
    fn call_line_builds_message_with_args() {
        let line = CallLine::parse(
            r#"{"serial": 3, "path": "/org/idbus/Users", "interface": "org.idbus.Users",
                "member": "FindByID", "sender": ":1.5", "uid": 1000, "args": [1001]}"#,
        )
        .unwrap();
        assert_eq!(
            line.credentials(),
            Some((":1.5", CallerIdentity { uid: 1000, pid: None }))
        );

        let message = line.into_message().unwrap();
        assert_eq!(message.serial, 3);
        assert_eq!(message.sender.as_deref(), Some(":1.5"));
        let (uid,): (u32,) = message.decode_body().unwrap();
        assert_eq!(uid, 1001);
    }

    #[test]
    fn call_line_without_args_has_empty_body() {
        let line = CallLine::parse(
            r#"{"path": "/org/idbus/Users/lab/2001", "interface": "org.idbus.Users.User",
                "member": "UpdateGroupsList"}"#,
        )
        .unwrap();
        assert!(line.credentials().is_none());
        assert!(line.into_message().unwrap().body.is_empty());
    }

    #[test]
    fn malformed_line_is_rejected() {
        assert!(CallLine::parse("{\"path\": 1}").is_err());
        assert!(CallLine::parse("not json").is_err());
    }

    #[test]
    fn renders_returns_and_errors() {
        let call = Message::method_call("/a", "org.example", "Do").with_serial(9);

        let ok = call.method_return(encode_body("/org/idbus/Users/lab/2001").unwrap());
        let rendered = render_reply(&ok);
        assert_eq!(rendered["reply_serial"], 9);
        assert_eq!(rendered["kind"], "return");
        assert_eq!(rendered["body"], "/org/idbus/Users/lab/2001");

        let err = call.error_reply(&MethodError::not_found("User not found"));
        let rendered = render_reply(&err);
        assert_eq!(rendered["error"], "org.idbus.Error.NotFound");
        assert_eq!(rendered["message"], "User not found");
    }
}
