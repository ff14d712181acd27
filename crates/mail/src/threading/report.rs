//! Serializable thread report

use serde::{Deserialize, Serialize};

use crate::models::{Message, Thread};

/// One message as it appears in a thread report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    /// RFC 3339, empty when the message had no parsable date
    pub date: String,
    pub in_reply_to: Option<String>,
}

impl From<&Message> for MessageSummary {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message
                .id
                .as_ref()
                .map(|id| id.as_str().to_string())
                .unwrap_or_default(),
            subject: message.subject.clone(),
            sender: message.from.display(),
            date: message.date_string(),
            in_reply_to: message.in_reply_to.as_ref().map(|id| id.as_str().to_string()),
        }
    }
}

/// Summary information for one thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub subject: String,
    pub message_count: usize,
    pub participants: Vec<String>,
    /// RFC 3339 date of the newest message, if any message was dated
    pub latest_date: Option<String>,
    pub messages: Vec<MessageSummary>,
}

impl From<&Thread> for ThreadSummary {
    fn from(thread: &Thread) -> Self {
        Self {
            thread_id: thread.id.as_str().to_string(),
            subject: thread.subject.clone(),
            message_count: thread.message_count(),
            participants: thread.participants.clone(),
            latest_date: thread.latest_date.map(|d| d.to_rfc3339()),
            messages: thread.messages.iter().map(MessageSummary::from).collect(),
        }
    }
}

/// Report over one threading run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadReport {
    /// Messages fetched, including ones that could not be threaded
    pub total_messages: usize,
    pub thread_count: usize,
    pub threads: Vec<ThreadSummary>,
}

impl ThreadReport {
    pub fn from_threads(total_messages: usize, threads: &[Thread]) -> Self {
        Self {
            total_messages,
            thread_count: threads.len(),
            threads: threads.iter().map(ThreadSummary::from).collect(),
        }
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailAddress;
    use crate::threading::build_threads;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_report_shape() {
        let messages = vec![
            Message::builder()
                .id("<a@x>")
                .subject("Lunch?")
                .from(EmailAddress::with_name("Alice", "alice@example.com"))
                .date(Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap())
                .build(),
            Message::builder()
                .id("<b@x>")
                .subject("Re: Lunch?")
                .from(EmailAddress::new("bob@example.com"))
                .date(Utc.with_ymd_and_hms(2024, 2, 1, 12, 30, 0).unwrap())
                .in_reply_to("<a@x>")
                .build(),
            Message::builder().subject("no id").build(),
        ];

        let threads = build_threads(&messages);
        let report = ThreadReport::from_threads(messages.len(), &threads);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(json["total_messages"], 3);
        assert_eq!(json["thread_count"], 1);
        let thread = &json["threads"][0];
        assert_eq!(thread["thread_id"], "<a@x>");
        assert_eq!(thread["subject"], "Lunch?");
        assert_eq!(thread["message_count"], 2);
        assert_eq!(thread["latest_date"], "2024-02-01T12:30:00+00:00");
        assert_eq!(
            thread["participants"],
            serde_json::json!(["alice@example.com", "bob@example.com"])
        );
        assert_eq!(thread["messages"][0]["sender"], "Alice <alice@example.com>");
        assert_eq!(thread["messages"][1]["in_reply_to"], "<a@x>");
        assert!(thread["messages"][0]["in_reply_to"].is_null());
    }
}
