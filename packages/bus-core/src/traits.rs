use async_trait::async_trait;

use crate::error::MethodError;
use crate::message::Message;
use crate::types::CallerIdentity;

/// Failure to claim routing for an object path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// The path is already routed, either by an exact claim or by a fallback
    /// claim on an ancestor.
    #[error("object path {0} is already claimed")]
    AlreadyClaimed(String),
    #[error("transport refused to claim {path}: {reason}")]
    Refused { path: String, reason: String },
}

/// Failure to hand a message to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("transport is disconnected")]
    Disconnected,
    #[error("outbound queue is full")]
    Full,
}

/// The bus link the dispatcher sits on.
///
/// Implementations own framing and marshalling; the dispatcher only claims
/// object paths, releases them, and sends fully built messages.
pub trait Transport: Send + Sync {
    /// Claims routing for `path`. A fallback claim also routes every path
    /// below `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::AlreadyClaimed`] if the path is already routed,
    /// or [`ClaimError::Refused`] for any other failure.
    fn claim_path(&self, path: &str, fallback: bool) -> Result<(), ClaimError>;

    /// Releases a previous claim on `path`. Unknown paths are ignored.
    fn release_path(&self, path: &str);

    /// Queues a message for delivery.
    ///
    /// # Errors
    ///
    /// Returns a [`SendError`] if the message cannot be queued.
    fn send(&self, message: Message) -> Result<(), SendError>;

    /// Sends a reply built by the caller.
    ///
    /// # Errors
    ///
    /// See [`Transport::send`].
    fn send_reply(&self, reply: Message) -> Result<(), SendError> {
        self.send(reply)
    }

    /// Sends an error reply to `request`.
    ///
    /// # Errors
    ///
    /// See [`Transport::send`].
    fn send_error(&self, request: &Message, error: &MethodError) -> Result<(), SendError> {
        self.send(request.error_reply(error))
    }
}

/// Resolves the transport-level sender name of a request to the identity of
/// the calling process.
///
/// Timeouts are the implementation's responsibility.
#[async_trait]
pub trait CallerResolver: Send + Sync {
    /// Resolves `sender` (the unique bus name, if the message carried one).
    async fn resolve_sender_identity(&self, sender: Option<&str>)
        -> anyhow::Result<CallerIdentity>;
}
