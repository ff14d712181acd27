//! Outcome of a delivery operation

use serde::{Deserialize, Serialize};

/// How bad a failed delivery is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSeverity {
    /// Neither durably stored nor delivered; the message exists nowhere
    Staging,
    /// Not delivered, but a staged copy (if any) is kept for retry
    Transport,
}

/// Result of one delivery attempt, serialized as-is by the CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub account: String,
    /// `Message-ID` of the delivered (or staged) message
    pub message_id: Option<String>,
    /// Transport that accepted the message, or the last one tried
    pub transport: Option<String>,
    /// Whether the fallback transport was used
    pub fallback_used: bool,
    /// Whether a durable copy was made before sending
    pub staged: bool,
    /// Reference of the staged copy, for retries
    pub stage_ref: Option<String>,
    /// Why the message could not be made durable
    pub stage_error: Option<String>,
    /// Why delivery failed
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            ..Self::default()
        }
    }

    pub(crate) fn stage_failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.staged = false;
        self.stage_error = Some(error.into());
        self
    }

    pub(crate) fn send_failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// `None` on success
    pub fn severity(&self) -> Option<FailureSeverity> {
        if self.success {
            None
        } else if self.stage_error.is_some() {
            Some(FailureSeverity::Staging)
        } else {
            Some(FailureSeverity::Transport)
        }
    }

    /// Whether a staged copy is waiting for a retry
    pub fn retry_pending(&self) -> bool {
        !self.success && self.staged
    }
}
