//! Composed outbound message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EmailAddress, MessageId};

/// A fully composed message ready for staging and delivery
///
/// Only plain-text bodies are rendered; richer MIME assembly happens before
/// a message reaches the delivery code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// From header; filled from the account profile when absent
    pub from: Option<String>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub subject: String,
    pub body: String,
    /// Assigned before staging when absent
    pub message_id: Option<MessageId>,
    pub in_reply_to: Option<MessageId>,
    pub references: Vec<MessageId>,
    pub date: Option<DateTime<Utc>>,
}

impl OutgoingMessage {
    pub fn new(to: Vec<EmailAddress>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: None,
            to,
            cc: Vec::new(),
            subject: subject.into(),
            body: body.into(),
            message_id: None,
            in_reply_to: None,
            references: Vec::new(),
            date: None,
        }
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn with_message_id(mut self, id: impl Into<MessageId>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Mark this message as a reply, extending the parent's references
    pub fn replying_to(mut self, parent: &MessageId, parent_references: &[MessageId]) -> Self {
        let mut references = parent_references.to_vec();
        references.push(parent.clone());
        self.in_reply_to = Some(parent.clone());
        self.references = references;
        self
    }

    /// Whether a non-empty From header is present
    pub fn has_sender(&self) -> bool {
        self.from.as_deref().is_some_and(|f| !f.trim().is_empty())
    }

    /// Assign a Message-ID under `domain` if the message has none
    pub fn ensure_message_id(&mut self, domain: &str) -> MessageId {
        match &self.message_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                let id = MessageId::new(format!("<{}@{}>", uuid::Uuid::new_v4(), domain));
                self.message_id = Some(id.clone());
                id
            }
        }
    }

    /// Envelope recipients (To and Cc addresses)
    pub fn recipients(&self) -> Vec<String> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .map(|a| a.email.clone())
            .filter(|e| !e.is_empty())
            .collect()
    }

    /// Render the message as RFC 5322 bytes with CRLF line endings
    pub fn to_rfc822(&self) -> Vec<u8> {
        let mut out = String::new();
        let date = self.date.unwrap_or_else(Utc::now);

        push_header(&mut out, "Date", &date.to_rfc2822());
        if let Some(from) = &self.from {
            push_header(&mut out, "From", from);
        }
        push_header(&mut out, "To", &join_addresses(&self.to));
        if !self.cc.is_empty() {
            push_header(&mut out, "Cc", &join_addresses(&self.cc));
        }
        push_header(&mut out, "Subject", &self.subject);
        if let Some(id) = &self.message_id {
            push_header(&mut out, "Message-ID", id.as_str());
        }
        if let Some(parent) = &self.in_reply_to {
            push_header(&mut out, "In-Reply-To", parent.as_str());
        }
        if !self.references.is_empty() {
            let refs: Vec<&str> = self.references.iter().map(|r| r.as_str()).collect();
            push_header(&mut out, "References", &refs.join(" "));
        }
        push_header(&mut out, "MIME-Version", "1.0");
        push_header(&mut out, "Content-Type", "text/plain; charset=utf-8");
        push_header(&mut out, "Content-Transfer-Encoding", "8bit");
        out.push_str("\r\n");

        for line in self.body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }

        out.into_bytes()
    }
}

fn push_header(out: &mut String, name: &str, value: &str) {
    // Header injection guard: collapse embedded line breaks
    let value: String = value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    out.push_str(name);
    out.push_str(": ");
    out.push_str(&value);
    out.push_str("\r\n");
}

fn join_addresses(addrs: &[EmailAddress]) -> String {
    addrs
        .iter()
        .map(EmailAddress::display)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> OutgoingMessage {
        let mut msg = OutgoingMessage::new(
            vec![EmailAddress::with_name("Bob", "bob@example.com")],
            "Quarterly numbers",
            "Hi Bob,\nsee attached.",
        )
        .with_from("Alice <alice@example.com>");
        msg.date = Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap());
        msg
    }

    #[test]
    fn test_render_headers_and_body() {
        let mut msg = sample();
        msg.ensure_message_id("example.com");
        let raw = String::from_utf8(msg.to_rfc822()).unwrap();

        assert!(raw.starts_with("Date: Mon, 6 May 2024 07:08:09 +0000\r\n"));
        assert!(raw.contains("From: Alice <alice@example.com>\r\n"));
        assert!(raw.contains("To: Bob <bob@example.com>\r\n"));
        assert!(raw.contains("Subject: Quarterly numbers\r\n"));
        assert!(raw.contains("Message-ID: <"));
        assert!(raw.ends_with("\r\n\r\nHi Bob,\r\nsee attached.\r\n"));
    }

    #[test]
    fn test_ensure_message_id_is_stable() {
        let mut msg = sample();
        let first = msg.ensure_message_id("example.com");
        let second = msg.ensure_message_id("other.org");
        assert_eq!(first, second);
        assert!(first.as_str().ends_with("@example.com>"));
    }

    #[test]
    fn test_reply_headers() {
        let parent = MessageId::new("<p@x>");
        let msg = sample().replying_to(&parent, &[MessageId::new("<root@x>")]);
        let raw = String::from_utf8(msg.to_rfc822()).unwrap();
        assert!(raw.contains("In-Reply-To: <p@x>\r\n"));
        assert!(raw.contains("References: <root@x> <p@x>\r\n"));
    }

    #[test]
    fn test_header_injection_is_neutralized() {
        let mut msg = sample();
        msg.subject = "hello\r\nBcc: victim@example.com".to_string();
        let raw = String::from_utf8(msg.to_rfc822()).unwrap();
        assert!(!raw.contains("\r\nBcc:"));
    }

    #[test]
    fn test_recipients_include_cc() {
        let msg = sample().with_cc(vec![EmailAddress::new("carol@example.com")]);
        assert_eq!(
            msg.recipients(),
            vec!["bob@example.com".to_string(), "carol@example.com".to_string()]
        );
    }
}
