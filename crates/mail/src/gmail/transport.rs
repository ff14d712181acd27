//! [`Transport`] sending through the Gmail API

use std::sync::Arc;

use super::client::GmailApi;
use crate::client::Transport;
use crate::error::{MailError, MailResult};

/// Sends rendered messages with `messages.send`
///
/// Gmail takes recipients from the message headers, so the envelope list is
/// only checked for emptiness.
pub struct GmailTransport {
    id: String,
    api: Arc<GmailApi>,
}

impl GmailTransport {
    pub fn new(id: impl Into<String>, api: Arc<GmailApi>) -> Self {
        Self { id: id.into(), api }
    }
}

impl Transport for GmailTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, raw: &[u8], recipients: &[String]) -> MailResult<()> {
        if recipients.is_empty() {
            return Err(MailError::Transport("no recipients".to_string()));
        }

        match self.api.send_message(raw) {
            Ok(sent) => {
                log::info!("Sent via {} as {}", self.id, sent.id);
                Ok(())
            }
            Err(e @ MailError::Connection(_)) => Err(e),
            Err(e) => Err(MailError::Transport(e.to_string())),
        }
    }
}
