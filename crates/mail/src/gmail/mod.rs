//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 authentication flow
//! - A thin REST client over the Gmail v1 API
//! - [`GmailMailbox`], a [`MailboxClient`] that treats labels as folders and
//!   emulates push-waits by polling the history feed
//! - [`GmailTransport`], a [`Transport`] sending through `messages.send`
//!
//! [`MailboxClient`]: crate::client::MailboxClient
//! [`Transport`]: crate::client::Transport

mod auth;
mod client;
mod mailbox;
mod normalize;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

pub use auth::GmailAuth;
pub use client::{GmailApi, MessageFormat};
pub use mailbox::GmailMailbox;
pub use normalize::{label_for_folder, normalize_message};
pub use transport::GmailTransport;

use crate::config::{GmailCredentials, TransportConfig};

/// Build an API client for a configured Gmail transport
pub fn api_from_config(config: &TransportConfig, timeout: Duration) -> Result<Arc<GmailApi>> {
    let TransportConfig::Gmail {
        id,
        credentials_file,
        token_file,
    } = config;

    let credentials = GmailCredentials::load(credentials_file.as_deref())?;
    let token_path = match token_file {
        Some(path) => path.clone(),
        None => GmailAuth::default_token_path(id)?,
    };

    Ok(Arc::new(GmailApi::new(
        GmailAuth::new(credentials, token_path),
        timeout,
    )))
}

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (ID only)
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Message as returned by `messages.get`
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        pub internal_date: Option<String>,
        pub payload: Option<MessagePayload>,
        /// base64url message source, only with `format=raw`
        pub raw: Option<String>,
        pub history_id: Option<String>,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub mime_type: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Label (folder)
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Label {
        pub id: String,
        pub name: String,
        /// `system` or `user`
        #[serde(rename = "type")]
        pub label_type: Option<String>,
        pub messages_total: Option<u32>,
        pub messages_unread: Option<u32>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct ListLabelsResponse {
        pub labels: Option<Vec<Label>>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Profile {
        pub email_address: String,
        pub history_id: String,
        pub messages_total: Option<u32>,
    }

    /// Response from `history.list`
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub history_id: Option<String>,
        pub next_page_token: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        pub messages_added: Option<Vec<HistoryMessage>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct HistoryMessage {
        pub message: MessageRef,
    }

    impl HistoryResponse {
        /// Ids of messages added across all records
        pub fn added_message_ids(&self) -> Vec<String> {
            self.history
                .iter()
                .flatten()
                .flat_map(|record| record.messages_added.iter().flatten())
                .map(|added| added.message.id.clone())
                .collect()
        }
    }

}
