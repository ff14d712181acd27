//! Storage trait definitions

use anyhow::Result;

use crate::error::MailResult;
use crate::models::{MessageId, OutboxEntry};

/// Durable home for outbound messages between staging and delivery
///
/// A staged copy is the source of truth for an undelivered message: it must
/// be persisted before any transport attempt and survive until delivery is
/// confirmed. Failures are reported as [`MailError::Staging`], except that
/// `load` reports a vanished copy as `Ok(None)`.
///
/// [`MailError::Staging`]: crate::error::MailError::Staging
pub trait StagingStore: Send + Sync {
    /// Persist a rendered message, returning a reference for `load`/`remove`
    fn stage(&self, message_id: &MessageId, raw: &[u8]) -> MailResult<String>;

    /// Read a staged message back
    fn load(&self, stage_ref: &str) -> MailResult<Option<Vec<u8>>>;

    /// Delete a staged message; removing an absent copy succeeds
    fn remove(&self, stage_ref: &str) -> MailResult<()>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

/// Ledger of staged messages and their delivery state
pub trait OutboxStore: Send + Sync {
    /// Insert or replace an entry
    fn save(&self, entry: &OutboxEntry) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<OutboxEntry>>;

    /// Delete an entry; deleting an absent entry succeeds
    fn remove(&self, id: &str) -> Result<()>;

    /// Entries of one account, oldest first
    fn list_for_account(&self, account_id: &str) -> Result<Vec<OutboxEntry>>;

    /// All entries, oldest first
    fn list_all(&self) -> Result<Vec<OutboxEntry>>;

    fn count(&self) -> Result<usize> {
        Ok(self.list_all()?.len())
    }
}
