//! Gmail API HTTP client
//!
//! Thin wrappers over the REST endpoints used by the mailbox and transport
//! adapters. Uses synchronous HTTP (ureq) to be executor-agnostic; every
//! request is bounded by the agent's global timeout.

use std::time::Duration;

use base64::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use ureq::Agent;
use ureq::http::Response;

use super::GmailAuth;
use super::api::{
    GmailMessage, HistoryResponse, Label, ListLabelsResponse, ListMessagesResponse, MessageRef,
    Profile,
};
use crate::error::{MailError, MailResult};

/// Largest page the list endpoints accept
const MAX_PAGE_SIZE: usize = 500;

/// How much of a message `messages.get` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    /// Headers and labels only
    Metadata,
    /// base64url encoded RFC 5322 source
    Raw,
}

impl MessageFormat {
    fn as_str(self) -> &'static str {
        match self {
            MessageFormat::Metadata => "metadata",
            MessageFormat::Raw => "raw",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawMessageRequest<'a> {
    raw: String,
    #[serde(skip_serializing_if = "no_labels")]
    label_ids: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest<'a> {
    add_label_ids: &'a [String],
    remove_label_ids: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    label_list_visibility: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_list_visibility: Option<&'a str>,
}

/// Gmail API client shared by the mailbox and transport adapters
pub struct GmailApi {
    auth: GmailAuth,
    agent: Agent,
}

impl GmailApi {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1/users/me";

    /// Create a client whose requests time out after `timeout`
    pub fn new(auth: GmailAuth, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { auth, agent }
    }

    pub fn auth(&self) -> &GmailAuth {
        &self.auth
    }

    fn bearer(&self) -> MailResult<String> {
        let token = self
            .auth
            .get_access_token()
            .map_err(|e| MailError::connection(format!("authentication failed: {:#}", e)))?;
        Ok(format!("Bearer {}", token))
    }

    fn get<T: DeserializeOwned>(&self, url: &str) -> MailResult<T> {
        let response = self
            .agent
            .get(url)
            .header("Authorization", &self.bearer()?)
            .call()?;
        decode(response)
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, url: &str, body: &B) -> MailResult<T> {
        let response = self
            .agent
            .post(url)
            .header("Authorization", &self.bearer()?)
            .send_json(body)?;
        decode(response)
    }

    /// Mailbox profile; also used as a cheap connectivity check
    pub fn profile(&self) -> MailResult<Profile> {
        self.get(&format!("{}/profile", Self::BASE_URL))
    }

    /// List message ids, newest first, following pages until `max` are collected
    pub fn list_messages(
        &self,
        label_id: Option<&str>,
        query: Option<&str>,
        max: usize,
    ) -> MailResult<Vec<MessageRef>> {
        let mut refs = Vec::new();
        let mut page_token: Option<String> = None;

        while refs.len() < max {
            let mut url = format!(
                "{}/messages?maxResults={}",
                Self::BASE_URL,
                (max - refs.len()).min(MAX_PAGE_SIZE)
            );
            if let Some(label) = label_id {
                url.push_str(&format!("&labelIds={}", urlencoding::encode(label)));
            }
            if let Some(q) = query {
                url.push_str(&format!("&q={}", urlencoding::encode(q)));
            }
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let page: ListMessagesResponse = self.get(&url)?;
            refs.extend(page.messages.unwrap_or_default());

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        refs.truncate(max);
        Ok(refs)
    }

    /// Get a message by API id
    pub fn get_message(&self, id: &str, format: MessageFormat) -> MailResult<GmailMessage> {
        self.get(&format!(
            "{}/messages/{}?format={}",
            Self::BASE_URL,
            urlencoding::encode(id),
            format.as_str()
        ))
    }

    /// Get a message, retrying transient failures with exponential backoff
    pub fn get_message_with_retry(
        &self,
        id: &str,
        format: MessageFormat,
        max_retries: u32,
    ) -> MailResult<GmailMessage> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 1;

        loop {
            match self.get_message(id, format) {
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    log::debug!("Retrying message {} after: {}", id, e);
                    std::thread::sleep(delay + Duration::from_millis(rand_jitter()));
                    delay *= 2;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Raw RFC 5322 source of a message
    pub fn get_raw(&self, id: &str) -> MailResult<Vec<u8>> {
        let message = self.get_message(id, MessageFormat::Raw)?;
        let raw = message
            .raw
            .ok_or_else(|| MailError::protocol(format!("message {} has no raw body", id)))?;
        decode_base64url(&raw)
    }

    /// Insert a message directly into the mailbox without sending it
    pub fn insert_message(&self, raw: &[u8], label_ids: &[String]) -> MailResult<MessageRef> {
        self.post(
            &format!("{}/messages?internalDateSource=dateHeader", Self::BASE_URL),
            &RawMessageRequest {
                raw: BASE64_URL_SAFE_NO_PAD.encode(raw),
                label_ids,
            },
        )
    }

    /// Send a message; recipients come from its headers
    pub fn send_message(&self, raw: &[u8]) -> MailResult<MessageRef> {
        self.post(
            &format!("{}/messages/send", Self::BASE_URL),
            &RawMessageRequest {
                raw: BASE64_URL_SAFE_NO_PAD.encode(raw),
                label_ids: &[],
            },
        )
    }

    /// Move a message to the trash
    pub fn trash_message(&self, id: &str) -> MailResult<()> {
        let _: GmailMessage = self.post(
            &format!(
                "{}/messages/{}/trash",
                Self::BASE_URL,
                urlencoding::encode(id)
            ),
            &serde_json::json!({}),
        )?;
        Ok(())
    }

    /// Add and remove labels on a message
    pub fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> MailResult<()> {
        let _: GmailMessage = self.post(
            &format!(
                "{}/messages/{}/modify",
                Self::BASE_URL,
                urlencoding::encode(id)
            ),
            &ModifyRequest {
                add_label_ids: add,
                remove_label_ids: remove,
            },
        )?;
        Ok(())
    }

    // === Labels API ===

    /// List all labels (folders) in the mailbox
    pub fn list_labels(&self) -> MailResult<Vec<Label>> {
        let response: ListLabelsResponse = self.get(&format!("{}/labels", Self::BASE_URL))?;
        Ok(response.labels.unwrap_or_default())
    }

    /// Label with message counters
    pub fn get_label(&self, id: &str) -> MailResult<Label> {
        self.get(&format!(
            "{}/labels/{}",
            Self::BASE_URL,
            urlencoding::encode(id)
        ))
    }

    pub fn create_label(&self, name: &str) -> MailResult<Label> {
        self.post(
            &format!("{}/labels", Self::BASE_URL),
            &LabelRequest {
                name,
                label_list_visibility: Some("labelShow"),
                message_list_visibility: Some("show"),
            },
        )
    }

    pub fn rename_label(&self, id: &str, name: &str) -> MailResult<Label> {
        let response = self
            .agent
            .patch(&format!(
                "{}/labels/{}",
                Self::BASE_URL,
                urlencoding::encode(id)
            ))
            .header("Authorization", &self.bearer()?)
            .send_json(&LabelRequest {
                name,
                label_list_visibility: None,
                message_list_visibility: None,
            })?;
        decode(response)
    }

    pub fn delete_label(&self, id: &str) -> MailResult<()> {
        self.agent
            .delete(&format!(
                "{}/labels/{}",
                Self::BASE_URL,
                urlencoding::encode(id)
            ))
            .header("Authorization", &self.bearer()?)
            .call()?;
        Ok(())
    }

    // === History API ===

    /// All history records after `start_history_id`, following pages
    ///
    /// # Errors
    /// [`MailError::NotFound`] when the history id is too old
    pub fn list_history(
        &self,
        start_history_id: &str,
        label_id: Option<&str>,
    ) -> MailResult<HistoryResponse> {
        let mut records = Vec::new();
        let mut latest_history_id = None;
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/history?startHistoryId={}&historyTypes=messageAdded",
                Self::BASE_URL,
                urlencoding::encode(start_history_id)
            );
            if let Some(label) = label_id {
                url.push_str(&format!("&labelId={}", urlencoding::encode(label)));
            }
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let page: HistoryResponse = self.get(&url)?;
            records.extend(page.history.unwrap_or_default());
            if page.history_id.is_some() {
                latest_history_id = page.history_id;
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(HistoryResponse {
            history: (!records.is_empty()).then_some(records),
            history_id: latest_history_id,
            next_page_token: None,
        })
    }
}

fn no_labels(labels: &&[String]) -> bool {
    labels.is_empty()
}

fn decode<T: DeserializeOwned>(mut response: Response<ureq::Body>) -> MailResult<T> {
    response
        .body_mut()
        .read_json()
        .map_err(|e| MailError::protocol(format!("invalid response: {}", e)))
}

/// Decode Gmail's base64url data
///
/// Padding varies between endpoints, so both forms are accepted.
pub(crate) fn decode_base64url(data: &str) -> MailResult<Vec<u8>> {
    BASE64_URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .or_else(|_| BASE64_STANDARD.decode(data))
        .map_err(|e| MailError::protocol(format!("invalid base64 body: {}", e)))
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64url_accepts_padding() {
        let raw = b"Subject: hi\r\n\r\nbody?>";
        let unpadded = BASE64_URL_SAFE_NO_PAD.encode(raw);
        let padded = base64::engine::general_purpose::URL_SAFE.encode(raw);
        assert_eq!(decode_base64url(&unpadded).unwrap(), raw);
        assert_eq!(decode_base64url(&padded).unwrap(), raw);
        assert!(decode_base64url("***").is_err());
    }

    #[test]
    fn test_raw_request_omits_empty_labels() {
        let body = RawMessageRequest {
            raw: "abc".into(),
            label_ids: &[],
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"raw":"abc"}"#);

        let labels = vec!["Label_1".to_string()];
        let body = RawMessageRequest {
            raw: "abc".into(),
            label_ids: &labels,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"raw":"abc","labelIds":["Label_1"]}"#
        );
    }

    #[test]
    fn test_jitter_bounded() {
        assert!(rand_jitter() < 100);
    }
}
