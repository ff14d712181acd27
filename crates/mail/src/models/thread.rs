//! Thread model representing a reconstructed conversation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Message;

/// Identifier for a thread: the id of its root message
///
/// The root may be a virtual root that was referenced by a reply header but
/// is not among the fetched messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A conversation built from reply and reference chains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Root message id
    pub id: ThreadId,
    /// Subject of the earliest message
    pub subject: String,
    /// Messages ordered by date ascending, undated first
    pub messages: Vec<Message>,
    /// Sender addresses, sorted and deduplicated
    pub participants: Vec<String>,
    /// Date of the most recent dated message
    pub latest_date: Option<DateTime<Utc>>,
}

impl Thread {
    /// Assemble a thread from its messages
    ///
    /// Sorts the messages and derives subject, participants and latest date.
    pub fn new(id: ThreadId, mut messages: Vec<Message>) -> Self {
        // Stable sort keeps fetch order among equal dates
        messages.sort_by_key(|m| m.date);

        let subject = messages
            .first()
            .map(|m| m.subject.clone())
            .unwrap_or_default();

        let mut participants: Vec<String> = messages
            .iter()
            .map(|m| m.from.email.clone())
            .filter(|email| !email.is_empty())
            .collect();
        participants.sort();
        participants.dedup();

        let latest_date = messages.iter().filter_map(|m| m.date).max();

        Self {
            id,
            subject,
            messages,
            participants,
            latest_date,
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
