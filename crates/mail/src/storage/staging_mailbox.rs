//! Staging in a provider-side folder (Drafts, Outbox)
//!
//! Staged copies live on the server, so they survive the loss of the local
//! machine and show up in other clients of the same account.

use std::sync::Mutex;

use log::{debug, warn};

use super::StagingStore;
use crate::client::{MailboxClient, SearchCriteria};
use crate::error::{MailError, MailResult};
use crate::models::MessageId;

/// Upper bound on copies found for one `Message-ID`
const MAX_COPIES: usize = 16;

struct Connection {
    client: Box<dyn MailboxClient>,
    connected: bool,
}

/// Stages messages by appending them to a mailbox folder
///
/// The stage reference is the server id of the appended copy, so removing
/// one submission leaves other copies of the same `Message-ID` alone. The
/// folder is created on first use.
pub struct MailboxStaging {
    folder: String,
    conn: Mutex<Connection>,
}

impl MailboxStaging {
    pub fn new(client: Box<dyn MailboxClient>, folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            conn: Mutex::new(Connection {
                client,
                connected: false,
            }),
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Run `op` on a connected client
    ///
    /// A connection-class failure marks the client disconnected so the next
    /// call reconnects. Every error is reported as a staging error.
    fn with_client<T>(
        &self,
        action: &str,
        op: impl FnOnce(&mut dyn MailboxClient, &str) -> MailResult<T>,
    ) -> MailResult<T> {
        let mut conn = self.conn.lock().unwrap();
        if !conn.connected {
            conn.client
                .connect()
                .map_err(|e| MailError::Staging(format!("{}: {}", action, e)))?;
            conn.connected = true;
        }

        match op(conn.client.as_mut(), &self.folder) {
            Ok(value) => Ok(value),
            Err(err) => {
                if matches!(err, MailError::Connection(_)) {
                    conn.connected = false;
                }
                Err(match err {
                    MailError::Staging(_) => err,
                    other => MailError::Staging(format!("{}: {}", action, other)),
                })
            }
        }
    }

    /// Server ids of every copy of `message_id` in the staging folder
    fn find_copies(client: &mut dyn MailboxClient, folder: &str, message_id: &str) -> MailResult<Vec<String>> {
        let criteria = SearchCriteria::MessageId(MessageId::new(message_id));
        Ok(client
            .search(folder, &criteria, MAX_COPIES)?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }
}

impl StagingStore for MailboxStaging {
    fn stage(&self, message_id: &MessageId, raw: &[u8]) -> MailResult<String> {
        self.with_client("stage", |client, folder| {
            let before = match Self::find_copies(client, folder, message_id.as_str()) {
                Ok(ids) => ids,
                Err(err) if err.is_not_found() => {
                    debug!("Creating staging folder {}", folder);
                    client.create_folder(folder)?;
                    Vec::new()
                }
                Err(err) => return Err(err),
            };

            if !client.append_message(raw, folder)? {
                return Err(MailError::Staging(format!(
                    "server refused to store {} in {}",
                    message_id, folder
                )));
            }

            // Earlier submissions of the same message keep their own copies
            Self::find_copies(client, folder, message_id.as_str())?
                .into_iter()
                .find(|id| !before.contains(id))
                .ok_or_else(|| {
                    MailError::Staging(format!(
                        "stored {} in {} but cannot find the new copy",
                        message_id, folder
                    ))
                })
        })
    }

    fn load(&self, stage_ref: &str) -> MailResult<Option<Vec<u8>>> {
        self.with_client("load", |client, folder| {
            match client.fetch_raw(stage_ref, folder) {
                Err(err) if err.is_not_found() => Ok(None),
                other => other,
            }
        })
    }

    fn remove(&self, stage_ref: &str) -> MailResult<()> {
        self.with_client("remove", |client, folder| {
            match client.delete_message(stage_ref, folder) {
                Ok(()) => Ok(()),
                // Already gone, e.g. removed by another client
                Err(err) if err.is_not_found() => {
                    warn!("Staged copy {} vanished from {}", stage_ref, folder);
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
    }

    fn describe(&self) -> String {
        format!("mailbox folder {}", self.folder)
    }
}
