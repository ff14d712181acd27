//! Events emitted by the watcher and the sinks that receive them

use std::io::Write;
use std::sync::mpsc::Sender;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::Message;

/// One new message as reported in a [`WatchEvent::NewMail`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageNotice {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
}

impl From<&Message> for MessageNotice {
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
        }
    }
}

/// Something the watcher reports to its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    NewMail {
        account: String,
        folder: String,
        /// 1-based, counted over the whole run
        event_number: u64,
        new_messages: usize,
        messages: Vec<MessageNotice>,
    },
    Error {
        account: String,
        folder: String,
        message: String,
        /// Seconds until the next connection attempt, if one is scheduled
        retry_in_secs: Option<u64>,
    },
    Log {
        level: String,
        message: String,
    },
}

impl WatchEvent {
    pub fn new_mail(account: &str, folder: &str, event_number: u64, messages: &[Message]) -> Self {
        WatchEvent::NewMail {
            account: account.to_string(),
            folder: folder.to_string(),
            event_number,
            new_messages: messages.len(),
            messages: messages.iter().map(MessageNotice::from).collect(),
        }
    }

    pub fn log(level: log::Level, message: impl Into<String>) -> Self {
        WatchEvent::Log {
            level: level.as_str().to_ascii_lowercase(),
            message: message.into(),
        }
    }

    pub fn is_new_mail(&self) -> bool {
        matches!(self, WatchEvent::NewMail { .. })
    }
}

/// Receiver of watcher events
///
/// A failing sink is logged and skipped; it never stops the watcher.
pub trait EventSink {
    fn emit(&mut self, event: WatchEvent) -> Result<()>;
}

/// Writes each event as one JSON object per line
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: WatchEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &event).context("Failed to serialize event")?;
        self.writer.write_all(b"\n")?;
        // Consumers read line by line, so every event is flushed immediately
        self.writer.flush()?;
        Ok(())
    }
}

impl EventSink for Vec<WatchEvent> {
    fn emit(&mut self, event: WatchEvent) -> Result<()> {
        self.push(event);
        Ok(())
    }
}

impl EventSink for Sender<WatchEvent> {
    fn emit(&mut self, event: WatchEvent) -> Result<()> {
        self.send(event).context("Event receiver dropped")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailAddress;
    use chrono::{TimeZone, Utc};

    fn message() -> Message {
        Message::builder()
            .id("<m1@example.com>")
            .subject("Hello")
            .from(EmailAddress::with_name("Alice", "alice@example.com"))
            .date(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
            .unread(true)
            .build()
    }

    #[test]
    fn test_json_lines_format() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(WatchEvent::new_mail("work", "INBOX", 1, &[message()]))
            .unwrap();
        sink.emit(WatchEvent::log(log::Level::Info, "connected"))
            .unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "new_mail");
        assert_eq!(first["account"], "work");
        assert_eq!(first["event_number"], 1);
        assert_eq!(first["new_messages"], 1);
        assert_eq!(first["messages"][0]["message_id"], "<m1@example.com>");
        assert_eq!(first["messages"][0]["sender"], "Alice <alice@example.com>");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "log");
        assert_eq!(second["level"], "info");
    }

    #[test]
    fn test_error_event_shape() {
        let event = WatchEvent::Error {
            account: "work".to_string(),
            folder: "INBOX".to_string(),
            message: "connection reset".to_string(),
            retry_in_secs: Some(5),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["retry_in_secs"], 5);
        assert!(!event.is_new_mail());
    }

    #[test]
    fn test_channel_sink() {
        let (mut tx, rx) = std::sync::mpsc::channel();
        tx.emit(WatchEvent::log(log::Level::Warn, "slow")).unwrap();
        assert_eq!(
            rx.recv().unwrap(),
            WatchEvent::Log {
                level: "warn".to_string(),
                message: "slow".to_string()
            }
        );
    }
}
