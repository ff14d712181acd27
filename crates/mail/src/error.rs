//! Typed errors crossing the mailbox, transport and staging seams
//!
//! Collaborators report failures through [`MailError`] so callers can tell a
//! dropped connection (reconnect and retry) from a rejected command (skip
//! the operation) without string matching.

use thiserror::Error;

/// Errors reported by mailbox clients, transports and staging stores
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    /// The connection failed or timed out; reconnecting may help
    #[error("connection error: {0}")]
    Connection(String),

    /// The server rejected a command; fatal for that single operation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A message or folder does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The message could not be durably persisted before sending
    #[error("staging error: {0}")]
    Staging(String),

    /// The message was not accepted by the transport
    #[error("transport error: {0}")]
    Transport(String),
}

impl MailError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether retrying after a reconnect may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Transport(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ureq::Error> for MailError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(404) => Self::NotFound("resource returned 404".to_string()),
            ureq::Error::StatusCode(code) if code == 429 || code >= 500 => {
                Self::Connection(format!("server returned {}", code))
            }
            ureq::Error::StatusCode(code) => Self::Protocol(format!("server returned {}", code)),
            other => Self::Connection(other.to_string()),
        }
    }
}

pub type MailResult<T> = std::result::Result<T, MailError>;
