//! Mailbox client and transport trait definitions

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MailResult;
use crate::models::{Message, MessageId};

/// Search criteria understood by every mailbox client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    All,
    Unseen,
    From(String),
    Subject(String),
    /// Match the `Message-ID` header exactly
    MessageId(MessageId),
}

/// Server-side handle for a message returned by a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    /// Server identifier (UID, API id)
    pub id: String,
    /// `Message-ID` header when the server reported it
    pub message_id: Option<MessageId>,
}

/// One response received while a push-wait is active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleResponse {
    /// `*` for untagged responses
    pub tag: String,
    /// Response text, e.g. `12 EXISTS`
    pub response: String,
}

impl IdleResponse {
    pub fn untagged(response: impl Into<String>) -> Self {
        Self {
            tag: "*".to_string(),
            response: response.into(),
        }
    }

    /// Whether this response announces new messages
    pub fn is_new_data(&self) -> bool {
        let upper = self.response.to_ascii_uppercase();
        upper
            .split_whitespace()
            .any(|word| word == "EXISTS" || word == "RECENT")
    }
}

/// Folder as listed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderInfo {
    pub name: String,
    /// Hierarchy delimiter, when the server has one
    pub delimiter: Option<String>,
    /// Server attributes or label type
    pub attributes: Vec<String>,
}

impl FolderInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delimiter: None,
            attributes: Vec::new(),
        }
    }
}

/// Message counters of a folder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderStatus {
    pub messages: u32,
    pub unseen: u32,
    pub recent: u32,
}

/// Raw mailbox protocol primitives
///
/// One client owns one connection. Implementations must bound every call
/// with a timeout so a stuck server cannot hang the caller; `idle_check`
/// is bounded by the timeout it is given. At most one push-wait may be
/// outstanding at a time: `idle_start` while waiting is a protocol error.
///
/// Missing messages and folders are reported as [`MailError::NotFound`]
/// where the signature has no `Option` to express them.
///
/// [`MailError::NotFound`]: crate::error::MailError::NotFound
pub trait MailboxClient: Send {
    fn connect(&mut self) -> MailResult<()>;

    fn disconnect(&mut self) -> MailResult<()>;

    fn search(
        &mut self,
        mailbox: &str,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> MailResult<Vec<MessageRef>>;

    /// Most recent messages of a folder, newest first
    fn fetch_all(&mut self, mailbox: &str, limit: usize) -> MailResult<Vec<Message>>;

    /// Most recent unread messages of a folder, newest first
    fn fetch_unread(&mut self, mailbox: &str, limit: usize) -> MailResult<Vec<Message>>;

    /// Look a message up by server id or `Message-ID`
    fn fetch_by_id(&mut self, id: &str, mailbox: &str) -> MailResult<Option<Message>>;

    /// Raw RFC 5322 bytes of a message
    fn fetch_raw(&mut self, id: &str, mailbox: &str) -> MailResult<Option<Vec<u8>>>;

    /// Begin a push-wait on `mailbox` that the server holds for at most `timeout`
    fn idle_start(&mut self, mailbox: &str, timeout: Duration) -> MailResult<()>;

    /// Wait up to `timeout` for responses to the active push-wait
    fn idle_check(&mut self, timeout: Duration) -> MailResult<Vec<IdleResponse>>;

    /// Terminate the active push-wait
    fn idle_done(&mut self) -> MailResult<()>;

    fn append_message(&mut self, raw: &[u8], mailbox: &str) -> MailResult<bool>;

    /// Move messages, reporting success per id
    fn move_messages_batch(
        &mut self,
        ids: &[String],
        from: &str,
        to: &str,
    ) -> MailResult<HashMap<String, bool>>;

    fn delete_message(&mut self, id: &str, mailbox: &str) -> MailResult<()>;

    fn create_folder(&mut self, name: &str) -> MailResult<bool>;

    fn delete_folder(&mut self, name: &str) -> MailResult<bool>;

    fn rename_folder(&mut self, from: &str, to: &str) -> MailResult<bool>;

    fn list_folders(&mut self) -> MailResult<Vec<FolderInfo>>;

    fn folder_status(&mut self, name: &str) -> MailResult<FolderStatus>;
}

/// Outbound delivery path
pub trait Transport: Send + Sync {
    /// Identifier referenced by account profiles
    fn id(&self) -> &str;

    /// Deliver a rendered message to the envelope recipients
    fn send(&self, raw: &[u8], recipients: &[String]) -> MailResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_data_detection() {
        assert!(IdleResponse::untagged("12 EXISTS").is_new_data());
        assert!(IdleResponse::untagged("1 recent").is_new_data());
        assert!(!IdleResponse::untagged("3 EXPUNGE").is_new_data());
        assert!(!IdleResponse::untagged("OK Still here").is_new_data());
    }
}
