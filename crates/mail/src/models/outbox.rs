//! Outbox entries tracking staged outbound messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a staged message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Persisted, delivery not yet resolved
    Staged,
    /// Delivered; the entry lingers only while its staged copy is removed
    Sent,
    /// Delivery failed; kept for retry
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Staged => "staged",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "staged" => Some(OutboxStatus::Staged),
            "sent" => Some(OutboxStatus::Sent),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }

    /// Whether an entry in this status still needs a delivery attempt
    pub fn needs_delivery(&self) -> bool {
        matches!(self, OutboxStatus::Staged | OutboxStatus::Failed)
    }
}

/// A staged outbound message awaiting delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Ledger id
    pub id: String,
    /// Account the message is sent from
    pub account_id: String,
    /// `Message-ID` of the staged message
    pub message_id: String,
    /// Reference understood by the account's staging store
    pub stage_ref: String,
    /// Subject, for inspection
    pub subject: String,
    /// Envelope recipients
    pub recipients: Vec<String>,
    /// Number of completed delivery attempts
    pub attempts: u32,
    /// Error of the most recent failed attempt
    pub last_error: Option<String>,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Create a freshly staged entry
    pub fn staged(
        account_id: impl Into<String>,
        message_id: impl Into<String>,
        stage_ref: impl Into<String>,
        subject: impl Into<String>,
        recipients: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            message_id: message_id.into(),
            stage_ref: stage_ref.into(),
            subject: subject.into(),
            recipients,
            attempts: 0,
            last_error: None,
            status: OutboxStatus::Staged,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a failed attempt
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.status = OutboxStatus::Failed;
        self.updated_at = Utc::now();
        self
    }

    /// Record a successful attempt whose staged copy is still present
    pub fn sent(mut self, cleanup_error: Option<String>) -> Self {
        self.attempts += 1;
        self.last_error = cleanup_error;
        self.status = OutboxStatus::Sent;
        self.updated_at = Utc::now();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let entry = OutboxEntry::staged("work", "<m1@x>", "<m1@x>", "Hi", vec![]);
        assert_eq!(entry.status, OutboxStatus::Staged);
        assert_eq!(entry.attempts, 0);

        let failed = entry.failed("connection reset");
        assert_eq!(failed.status, OutboxStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("connection reset"));

        let sent = failed.sent(None);
        assert_eq!(sent.status, OutboxStatus::Sent);
        assert_eq!(sent.attempts, 2);
        assert!(sent.last_error.is_none());
    }

    #[test]
    fn test_status_strings() {
        for status in [OutboxStatus::Staged, OutboxStatus::Sent, OutboxStatus::Failed] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("queued"), None);
        assert!(OutboxStatus::Failed.needs_delivery());
        assert!(!OutboxStatus::Sent.needs_delivery());
    }
}
