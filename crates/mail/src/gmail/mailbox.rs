//! [`MailboxClient`] over the Gmail API
//!
//! Folders are labels. Gmail has no push-wait on a plain HTTP connection, so
//! a push-wait is emulated: `idle_start` records the mailbox history id and
//! each `idle_check` waits out its slice, then asks the history feed for
//! messages added since. New messages surface as `N EXISTS` responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::client::{GmailApi, MessageFormat};
use super::normalize::{label_for_folder, normalize_message};
use crate::client::{
    FolderInfo, FolderStatus, IdleResponse, MailboxClient, MessageRef, SearchCriteria,
};
use crate::error::{MailError, MailResult};
use crate::models::{Message, MessageId};

/// Retries for a single message fetch
const FETCH_RETRIES: u32 = 3;

struct IdleState {
    label_id: String,
    history_id: String,
}

pub struct GmailMailbox {
    api: Arc<GmailApi>,
    /// User label name -> label id
    labels: HashMap<String, String>,
    idle: Option<IdleState>,
    connected: bool,
}

impl GmailMailbox {
    pub fn new(api: Arc<GmailApi>) -> Self {
        Self {
            api,
            labels: HashMap::new(),
            idle: None,
            connected: false,
        }
    }

    fn ensure_connected(&self) -> MailResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(MailError::connection("not connected"))
        }
    }

    fn refresh_labels(&mut self) -> MailResult<()> {
        self.labels = self
            .api
            .list_labels()?
            .into_iter()
            .map(|label| (label.name, label.id))
            .collect();
        Ok(())
    }

    /// Label id for a folder name, if the folder exists
    fn label_id(&mut self, folder: &str) -> MailResult<Option<String>> {
        if let Some(system) = label_for_folder(folder) {
            return Ok(Some(system.to_string()));
        }
        if !self.labels.contains_key(folder) {
            self.refresh_labels()?;
        }
        Ok(self.labels.get(folder).cloned())
    }

    fn require_label(&mut self, folder: &str) -> MailResult<String> {
        self.label_id(folder)?
            .ok_or_else(|| MailError::not_found(format!("folder {}", folder)))
    }

    fn list_refs(
        &mut self,
        mailbox: &str,
        query: Option<&str>,
        limit: usize,
    ) -> MailResult<Vec<MessageRef>> {
        self.ensure_connected()?;
        let label = self.require_label(mailbox)?;
        let refs = self.api.list_messages(Some(&label), query, limit)?;
        Ok(refs
            .into_iter()
            .map(|r| MessageRef {
                id: r.id,
                message_id: None,
            })
            .collect())
    }

    fn fetch_refs(&self, refs: Vec<MessageRef>, mailbox: &str) -> MailResult<Vec<Message>> {
        let mut messages = Vec::with_capacity(refs.len());
        for r in refs {
            match self
                .api
                .get_message_with_retry(&r.id, MessageFormat::Metadata, FETCH_RETRIES)
            {
                Ok(gmail) => messages.push(normalize_message(&gmail, mailbox)),
                // Deleted between list and get
                Err(MailError::NotFound(_)) => log::debug!("Message {} vanished", r.id),
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    /// Resolve a server id or `Message-ID` to an API id
    fn resolve(&mut self, id: &str, mailbox: &str) -> MailResult<Option<String>> {
        if !looks_like_message_id(id) {
            return Ok(Some(id.to_string()));
        }
        let criteria = SearchCriteria::MessageId(MessageId::new(id));
        Ok(self
            .search(mailbox, &criteria, 1)?
            .into_iter()
            .next()
            .map(|r| r.id))
    }
}

/// Gmail API ids are hex; `Message-ID` values carry an `@`
fn looks_like_message_id(id: &str) -> bool {
    id.contains('@') || id.starts_with('<')
}

/// Gmail search syntax for the shared criteria
fn search_query(criteria: &SearchCriteria) -> Option<String> {
    match criteria {
        SearchCriteria::All => None,
        SearchCriteria::Unseen => Some("is:unread".to_string()),
        SearchCriteria::From(from) => Some(format!("from:({})", from)),
        SearchCriteria::Subject(subject) => Some(format!("subject:({})", subject)),
        SearchCriteria::MessageId(id) => Some(format!(
            "rfc822msgid:{}",
            id.as_str().trim_start_matches('<').trim_end_matches('>')
        )),
    }
}

impl MailboxClient for GmailMailbox {
    fn connect(&mut self) -> MailResult<()> {
        let profile = self.api.profile()?;
        self.refresh_labels()?;
        self.connected = true;
        log::info!("Connected to Gmail as {}", profile.email_address);
        Ok(())
    }

    fn disconnect(&mut self) -> MailResult<()> {
        self.idle = None;
        self.connected = false;
        Ok(())
    }

    fn search(
        &mut self,
        mailbox: &str,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> MailResult<Vec<MessageRef>> {
        let query = search_query(criteria);
        let mut refs = self.list_refs(mailbox, query.as_deref(), limit)?;
        if let SearchCriteria::MessageId(id) = criteria {
            for r in &mut refs {
                r.message_id = Some(id.clone());
            }
        }
        Ok(refs)
    }

    fn fetch_all(&mut self, mailbox: &str, limit: usize) -> MailResult<Vec<Message>> {
        let refs = self.list_refs(mailbox, None, limit)?;
        self.fetch_refs(refs, mailbox)
    }

    fn fetch_unread(&mut self, mailbox: &str, limit: usize) -> MailResult<Vec<Message>> {
        let refs = self.list_refs(mailbox, Some("is:unread"), limit)?;
        self.fetch_refs(refs, mailbox)
    }

    fn fetch_by_id(&mut self, id: &str, mailbox: &str) -> MailResult<Option<Message>> {
        self.ensure_connected()?;
        let Some(api_id) = self.resolve(id, mailbox)? else {
            return Ok(None);
        };
        match self.api.get_message(&api_id, MessageFormat::Metadata) {
            Ok(gmail) => Ok(Some(normalize_message(&gmail, mailbox))),
            Err(MailError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn fetch_raw(&mut self, id: &str, mailbox: &str) -> MailResult<Option<Vec<u8>>> {
        self.ensure_connected()?;
        let Some(api_id) = self.resolve(id, mailbox)? else {
            return Ok(None);
        };
        match self.api.get_raw(&api_id) {
            Ok(raw) => Ok(Some(raw)),
            Err(MailError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn idle_start(&mut self, mailbox: &str, timeout: Duration) -> MailResult<()> {
        self.ensure_connected()?;
        if self.idle.is_some() {
            return Err(MailError::protocol("push-wait already active"));
        }
        let label_id = self.require_label(mailbox)?;
        let profile = self.api.profile()?;
        log::debug!(
            "Watching {} from history {} for up to {:?}",
            mailbox,
            profile.history_id,
            timeout
        );
        self.idle = Some(IdleState {
            label_id,
            history_id: profile.history_id,
        });
        Ok(())
    }

    fn idle_check(&mut self, timeout: Duration) -> MailResult<Vec<IdleResponse>> {
        let Some(idle) = self.idle.as_ref() else {
            return Err(MailError::protocol("no push-wait active"));
        };
        let (label_id, start) = (idle.label_id.clone(), idle.history_id.clone());

        std::thread::sleep(timeout);

        let (added, latest) = match self.api.list_history(&start, Some(&label_id)) {
            Ok(history) => (history.added_message_ids().len(), history.history_id),
            Err(MailError::NotFound(_)) => {
                // History expired; resync from the current id and report new data
                log::warn!("History id {} expired, resyncing", start);
                (1, Some(self.api.profile()?.history_id))
            }
            Err(e) => return Err(e),
        };

        if let (Some(idle), Some(latest)) = (self.idle.as_mut(), latest) {
            idle.history_id = latest;
        }

        if added == 0 {
            Ok(Vec::new())
        } else {
            Ok(vec![IdleResponse::untagged(format!("{} EXISTS", added))])
        }
    }

    fn idle_done(&mut self) -> MailResult<()> {
        match self.idle.take() {
            Some(_) => Ok(()),
            None => Err(MailError::protocol("no push-wait active")),
        }
    }

    fn append_message(&mut self, raw: &[u8], mailbox: &str) -> MailResult<bool> {
        self.ensure_connected()?;
        let label = self.require_label(mailbox)?;
        self.api.insert_message(raw, &[label])?;
        Ok(true)
    }

    fn move_messages_batch(
        &mut self,
        ids: &[String],
        from: &str,
        to: &str,
    ) -> MailResult<HashMap<String, bool>> {
        self.ensure_connected()?;
        let from_label = self.require_label(from)?;
        let to_label = self.require_label(to)?;

        let mut results = HashMap::with_capacity(ids.len());
        for id in ids {
            let moved = match self.api.modify_labels(
                id,
                std::slice::from_ref(&to_label),
                std::slice::from_ref(&from_label),
            ) {
                Ok(()) => true,
                Err(e @ MailError::Connection(_)) => return Err(e),
                Err(e) => {
                    log::warn!("Failed to move {} from {} to {}: {}", id, from, to, e);
                    false
                }
            };
            results.insert(id.clone(), moved);
        }
        Ok(results)
    }

    fn delete_message(&mut self, id: &str, mailbox: &str) -> MailResult<()> {
        self.ensure_connected()?;
        let api_id = self
            .resolve(id, mailbox)?
            .ok_or_else(|| MailError::not_found(format!("message {}", id)))?;
        self.api.trash_message(&api_id)
    }

    fn create_folder(&mut self, name: &str) -> MailResult<bool> {
        self.ensure_connected()?;
        if self.label_id(name)?.is_some() {
            return Ok(false);
        }
        let label = self.api.create_label(name)?;
        self.labels.insert(label.name, label.id);
        Ok(true)
    }

    fn delete_folder(&mut self, name: &str) -> MailResult<bool> {
        self.ensure_connected()?;
        if label_for_folder(name).is_some() {
            return Err(MailError::protocol(format!("cannot delete system folder {}", name)));
        }
        let Some(id) = self.label_id(name)? else {
            return Ok(false);
        };
        self.api.delete_label(&id)?;
        self.labels.remove(name);
        Ok(true)
    }

    fn rename_folder(&mut self, from: &str, to: &str) -> MailResult<bool> {
        self.ensure_connected()?;
        if label_for_folder(from).is_some() {
            return Err(MailError::protocol(format!("cannot rename system folder {}", from)));
        }
        let Some(id) = self.label_id(from)? else {
            return Ok(false);
        };
        let label = self.api.rename_label(&id, to)?;
        self.labels.remove(from);
        self.labels.insert(label.name, label.id);
        Ok(true)
    }

    fn list_folders(&mut self) -> MailResult<Vec<FolderInfo>> {
        self.ensure_connected()?;
        let labels = self.api.list_labels()?;
        Ok(labels
            .into_iter()
            .map(|label| FolderInfo {
                name: label.name,
                delimiter: Some("/".to_string()),
                attributes: label.label_type.into_iter().collect(),
            })
            .collect())
    }

    fn folder_status(&mut self, name: &str) -> MailResult<FolderStatus> {
        self.ensure_connected()?;
        let id = self.require_label(name)?;
        let label = self.api.get_label(&id)?;
        Ok(FolderStatus {
            messages: label.messages_total.unwrap_or(0),
            unseen: label.messages_unread.unwrap_or(0),
            recent: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_queries() {
        assert_eq!(search_query(&SearchCriteria::All), None);
        assert_eq!(
            search_query(&SearchCriteria::Unseen).as_deref(),
            Some("is:unread")
        );
        assert_eq!(
            search_query(&SearchCriteria::From("bob@example.com".into())).as_deref(),
            Some("from:(bob@example.com)")
        );
        assert_eq!(
            search_query(&SearchCriteria::MessageId(MessageId::new("<a@example.com>")))
                .as_deref(),
            Some("rfc822msgid:a@example.com")
        );
    }

    #[test]
    fn test_message_id_detection() {
        assert!(looks_like_message_id("<a@example.com>"));
        assert!(looks_like_message_id("a@example.com"));
        assert!(!looks_like_message_id("18c0f3a2b4d5e6f7"));
    }
}
