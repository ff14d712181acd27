//! Gmail API response normalization
//!
//! Converts Gmail API responses to Courier domain models.

use chrono::{TimeZone, Utc};

use super::api::GmailMessage;
use crate::client::message_from_headers;
use crate::models::Message;

/// Label Gmail applies to unread messages
pub const UNREAD_LABEL: &str = "UNREAD";

/// Folder names that map directly onto Gmail system labels
const SYSTEM_LABELS: &[&str] = &[
    "INBOX",
    "SENT",
    "DRAFT",
    "SPAM",
    "TRASH",
    "STARRED",
    "IMPORTANT",
    "UNREAD",
];

/// System label id for a folder name, matched case-insensitively
pub fn label_for_folder(folder: &str) -> Option<&'static str> {
    SYSTEM_LABELS
        .iter()
        .copied()
        .find(|label| label.eq_ignore_ascii_case(folder))
}

/// Normalize a Gmail API message fetched with `format=metadata`
pub fn normalize_message(gmail_msg: &GmailMessage, folder: &str) -> Message {
    let headers = gmail_msg
        .payload
        .as_ref()
        .and_then(|p| p.headers.as_deref())
        .unwrap_or_default();

    let mut message = message_from_headers(
        headers.iter().map(|h| (h.name.as_str(), h.value.as_str())),
        folder,
    );

    // Fall back to the server receive time when the Date header is unusable
    if message.date.is_none() {
        message.date = gmail_msg
            .internal_date
            .as_deref()
            .and_then(|d| d.parse::<i64>().ok())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
    }

    message.is_unread = gmail_msg
        .label_ids
        .iter()
        .flatten()
        .any(|label| label == UNREAD_LABEL);

    message
}
