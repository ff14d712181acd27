//! Message model representing a fetched mail message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a message (the RFC 5322 `Message-ID` value)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a `References`-style header into ids, oldest first
    ///
    /// Ids are separated by whitespace or commas; empty tokens are dropped.
    pub fn parse_list(header: &str) -> Vec<MessageId> {
        header
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(MessageId::new)
            .collect()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse an email address from a string like "John Doe <john@example.com>"
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Parse a comma-separated address list, skipping empty entries
    pub fn parse_list(s: &str) -> Vec<EmailAddress> {
        s.split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(EmailAddress::parse)
            .collect()
    }

    /// Format the email address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

impl From<&str> for EmailAddress {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// A single fetched message
///
/// Only the headers needed for threading and notification are kept; bodies
/// stay on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// `Message-ID`; absent or empty ids cannot be threaded
    pub id: Option<MessageId>,
    /// Subject line
    pub subject: String,
    /// Sender address
    pub from: EmailAddress,
    /// Recipients (To field)
    pub to: Vec<EmailAddress>,
    /// CC recipients
    pub cc: Vec<EmailAddress>,
    /// `Date` header, when it parsed
    pub date: Option<DateTime<Utc>>,
    /// `In-Reply-To` header
    pub in_reply_to: Option<MessageId>,
    /// `References` header, oldest first
    pub references: Vec<MessageId>,
    /// Folder the message was fetched from
    pub folder: String,
    /// Whether the message was unread when fetched
    #[serde(default)]
    pub is_unread: bool,
}

impl Message {
    /// Create a new message builder
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// The id if present and non-empty
    pub fn resolvable_id(&self) -> Option<&MessageId> {
        self.id.as_ref().filter(|id| !id.is_empty())
    }

    /// Date formatted as RFC 3339, or an empty string when unknown
    pub fn date_string(&self) -> String {
        self.date.map(|d| d.to_rfc3339()).unwrap_or_default()
    }
}

/// Builder for creating Message instances
#[derive(Default)]
pub struct MessageBuilder {
    id: Option<MessageId>,
    subject: String,
    from: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    date: Option<DateTime<Utc>>,
    in_reply_to: Option<MessageId>,
    references: Vec<MessageId>,
    folder: String,
    is_unread: bool,
}

impl MessageBuilder {
    pub fn id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn maybe_date(mut self, date: Option<DateTime<Utc>>) -> Self {
        self.date = date;
        self
    }

    pub fn in_reply_to(mut self, id: impl Into<MessageId>) -> Self {
        self.in_reply_to = Some(id.into());
        self
    }

    pub fn references<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<MessageId>,
    {
        self.references = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn unread(mut self, is_unread: bool) -> Self {
        self.is_unread = is_unread;
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            subject: self.subject,
            from: self.from.unwrap_or_else(|| EmailAddress::new("")),
            to: self.to,
            cc: self.cc,
            date: self.date,
            in_reply_to: self.in_reply_to.filter(|id| !id.is_empty()),
            references: self.references.into_iter().filter(|id| !id.is_empty()).collect(),
            folder: self.folder,
            is_unread: self.is_unread,
        }
    }
}
