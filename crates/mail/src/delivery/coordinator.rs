//! Staged, fallback-aware outbound delivery

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, error, info, warn};
use rayon::prelude::*;

use super::accounts::AccountManager;
use super::result::DeliveryResult;
use crate::client::Transport;
use crate::models::{Account, EmailAddress, MessageId, OutboxEntry, OutboxStatus, OutgoingMessage};
use crate::storage::{OutboxStore, StagingStore};

/// Transports tried for one message and how the last one fared
struct Attempt {
    transport: Option<String>,
    fallback_used: bool,
    error: Option<String>,
}

impl Attempt {
    fn apply(self, mut result: DeliveryResult) -> DeliveryResult {
        result.transport = self.transport;
        result.fallback_used = self.fallback_used;
        match self.error {
            Some(error) => result.send_failed(error),
            None => {
                result.success = true;
                result
            }
        }
    }
}

/// Sends composed messages for configured accounts
///
/// The outbox path works in three steps:
/// 1. Persist the rendered message in the account's staging store and
///    record it in the ledger
/// 2. Send via the primary transport, then once via the fallback
/// 3. On success drop the staged copy and ledger entry; on failure keep
///    both for [`retry_staged`](Self::retry_staged)
///
/// Operations on different accounts may run concurrently. Operations on
/// one account must be serialized by the caller; [`send_batch`](Self::send_batch)
/// does this itself.
pub struct DeliveryCoordinator {
    accounts: AccountManager,
    outbox: Arc<dyn OutboxStore>,
}

impl DeliveryCoordinator {
    pub fn new(accounts: AccountManager, outbox: Arc<dyn OutboxStore>) -> Self {
        Self { accounts, outbox }
    }

    pub fn accounts(&self) -> &AccountManager {
        &self.accounts
    }

    /// Ledger entries still waiting for an account
    pub fn pending(&self, account_id: &str) -> Result<Vec<OutboxEntry>> {
        self.outbox.list_for_account(account_id)
    }

    /// Stage, send, then remove the staged copy
    ///
    /// A staging failure returns before any transport is contacted.
    pub fn send_via_outbox(&self, message: OutgoingMessage, account_id: &str) -> DeliveryResult {
        let result = DeliveryResult::new(account_id);
        let Some(account) = self.accounts.account(account_id) else {
            return result.stage_failed(format!("unknown account {}", account_id));
        };
        let (message, message_id) = match self.prepare(message, account) {
            Ok(prepared) => prepared,
            Err(err) => return result.stage_failed(err),
        };
        let mut result = DeliveryResult {
            message_id: Some(message_id.to_string()),
            ..result
        };
        let Some(staging) = self.accounts.staging(account_id) else {
            return result.stage_failed(format!("no staging store configured for {}", account_id));
        };

        let raw = message.to_rfc822();
        let stage_ref = match staging.stage(&message_id, &raw) {
            Ok(stage_ref) => stage_ref,
            Err(err) => {
                error!(
                    "Failed to stage {} for {} in {}: {}",
                    message_id,
                    account_id,
                    staging.describe(),
                    err
                );
                return result.stage_failed(err.to_string());
            }
        };

        let entry = OutboxEntry::staged(
            account_id,
            message_id.as_str(),
            stage_ref.clone(),
            message.subject.clone(),
            message.recipients(),
        );
        if let Err(err) = self.outbox.save(&entry) {
            error!("Failed to record outbox entry for {}: {:#}", message_id, err);
            if let Err(cleanup) = staging.remove(&stage_ref) {
                warn!("Failed to remove unrecorded staged copy {}: {}", stage_ref, cleanup);
            }
            return result.stage_failed(format!("failed to record outbox entry: {:#}", err));
        }

        debug!("Staged {} for {} in {}", message_id, account_id, staging.describe());
        result.staged = true;
        result.stage_ref = Some(stage_ref);
        self.send_staged(account, staging.as_ref(), entry, &raw, result)
    }

    /// Send through the account's transports without staging
    pub fn send_with_fallback(&self, message: OutgoingMessage, account_id: &str) -> DeliveryResult {
        let result = DeliveryResult::new(account_id);
        let Some(account) = self.accounts.account(account_id) else {
            return result.send_failed(format!("unknown account {}", account_id));
        };
        let (message, message_id) = match self.prepare(message, account) {
            Ok(prepared) => prepared,
            Err(err) => return result.send_failed(err),
        };
        let result = DeliveryResult {
            message_id: Some(message_id.to_string()),
            ..result
        };

        self.deliver(account, &message.to_rfc822(), &message.recipients())
            .apply(result)
    }

    /// Send once through an ad-hoc transport, bypassing accounts and staging
    ///
    /// The message must carry its own From header. Nothing is persisted, so
    /// a failure here leaves no copy behind.
    pub fn send_direct(&self, mut message: OutgoingMessage, transport: &dyn Transport) -> DeliveryResult {
        let sender = message.from.as_deref().map(EmailAddress::parse);
        let result = DeliveryResult::new(sender.as_ref().map(|s| s.email.clone()).unwrap_or_default());

        if !message.has_sender() {
            return result.send_failed("message has no sender");
        }
        let recipients = message.recipients();
        if recipients.is_empty() {
            return result.send_failed("message has no recipients");
        }

        let domain = sender
            .as_ref()
            .and_then(|s| s.email.rsplit_once('@').map(|(_, d)| d.to_string()))
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        let message_id = message.ensure_message_id(&domain);
        let mut result = DeliveryResult {
            message_id: Some(message_id.to_string()),
            transport: Some(transport.id().to_string()),
            ..result
        };

        match transport.send(&message.to_rfc822(), &recipients) {
            Ok(()) => {
                info!("Delivered {} directly via {}", message_id, transport.id());
                result.success = true;
                result
            }
            Err(err) => {
                warn!("Direct send of {} via {} failed: {}", message_id, transport.id(), err);
                result.send_failed(err.to_string())
            }
        }
    }

    /// Resubmit every undelivered ledger entry of an account
    ///
    /// Staged and failed entries are resent from their staged copy; sent
    /// entries whose copy could not be removed get the removal retried.
    pub fn retry_staged(&self, account_id: &str) -> Vec<DeliveryResult> {
        let Some(account) = self.accounts.account(account_id) else {
            warn!("Cannot retry outbox of unknown account {}", account_id);
            return Vec::new();
        };
        let Some(staging) = self.accounts.staging(account_id) else {
            warn!("Account {} has no staging store to retry from", account_id);
            return Vec::new();
        };
        let entries = match self.outbox.list_for_account(account_id) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Failed to read outbox for {}: {:#}", account_id, err);
                return Vec::new();
            }
        };

        if !entries.is_empty() {
            info!("Retrying {} outbox entries for {}", entries.len(), account_id);
        }
        entries
            .into_iter()
            .map(|entry| self.retry_entry(account, staging.as_ref(), entry))
            .collect()
    }

    /// Deliver many messages through the outbox
    ///
    /// Accounts are processed in parallel; each account's messages go out
    /// one at a time in submission order. Results come back in submission
    /// order.
    pub fn send_batch(&self, batch: Vec<(String, OutgoingMessage)>) -> Vec<DeliveryResult> {
        let mut groups: Vec<(String, Vec<(usize, OutgoingMessage)>)> = Vec::new();
        let mut group_of: HashMap<String, usize> = HashMap::new();
        for (index, (account, message)) in batch.into_iter().enumerate() {
            let slot = *group_of.entry(account.clone()).or_insert_with(|| {
                groups.push((account, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push((index, message));
        }

        let mut results: Vec<(usize, DeliveryResult)> = groups
            .into_par_iter()
            .flat_map_iter(|(account, messages)| {
                messages
                    .into_iter()
                    .map(move |(index, message)| (index, self.send_via_outbox(message, &account)))
            })
            .collect();

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Fill in the sender and Message-ID
    fn prepare(
        &self,
        mut message: OutgoingMessage,
        account: &Account,
    ) -> std::result::Result<(OutgoingMessage, MessageId), String> {
        if !message.has_sender() {
            match self.accounts.get_sender(&account.id) {
                Some(sender) => message.from = Some(sender),
                None => return Err(format!("account {} has no sender address", account.id)),
            }
        }
        if message.recipients().is_empty() {
            return Err("message has no recipients".to_string());
        }
        let message_id = message.ensure_message_id(account.domain());
        Ok((message, message_id))
    }

    /// Primary transport, then the fallback once
    fn deliver(&self, account: &Account, raw: &[u8], recipients: &[String]) -> Attempt {
        let primary_error = match self.try_transport(&account.transport, raw, recipients) {
            Ok(()) => {
                return Attempt {
                    transport: Some(account.transport.clone()),
                    fallback_used: false,
                    error: None,
                };
            }
            Err(err) => err,
        };
        warn!("Sending from {} failed: {}", account.id, primary_error);

        let Some(fallback) = account
            .fallback_transport
            .as_deref()
            .filter(|f| *f != account.transport)
        else {
            return Attempt {
                transport: Some(account.transport.clone()),
                fallback_used: false,
                error: Some(primary_error),
            };
        };

        info!("Retrying {} via fallback transport {}", account.id, fallback);
        let error = match self.try_transport(fallback, raw, recipients) {
            Ok(()) => None,
            Err(fallback_error) => {
                warn!("Fallback for {} failed: {}", account.id, fallback_error);
                Some(format!("{}; {}", primary_error, fallback_error))
            }
        };
        Attempt {
            transport: Some(fallback.to_string()),
            fallback_used: true,
            error,
        }
    }

    fn try_transport(
        &self,
        id: &str,
        raw: &[u8],
        recipients: &[String],
    ) -> std::result::Result<(), String> {
        let transport = self
            .accounts
            .transport(id)
            .ok_or_else(|| format!("{}: unknown transport", id))?;
        transport
            .send(raw, recipients)
            .map_err(|err| format!("{}: {}", id, err))
    }

    fn send_staged(
        &self,
        account: &Account,
        staging: &dyn StagingStore,
        entry: OutboxEntry,
        raw: &[u8],
        result: DeliveryResult,
    ) -> DeliveryResult {
        let result = self.deliver(account, raw, &entry.recipients).apply(result);

        match &result.error {
            Some(error) => {
                warn!(
                    "{} stays staged in {} for retry",
                    entry.message_id,
                    staging.describe()
                );
                self.record(&entry.failed(error.clone()));
            }
            None => {
                info!(
                    "Delivered {} from {} via {}",
                    entry.message_id,
                    account.id,
                    result.transport.as_deref().unwrap_or_default()
                );
                self.finish(staging, entry);
            }
        }
        result
    }

    fn retry_entry(
        &self,
        account: &Account,
        staging: &dyn StagingStore,
        entry: OutboxEntry,
    ) -> DeliveryResult {
        let result = DeliveryResult {
            message_id: Some(entry.message_id.clone()),
            stage_ref: Some(entry.stage_ref.clone()),
            staged: true,
            ..DeliveryResult::new(&account.id)
        };

        if entry.status == OutboxStatus::Sent {
            // Delivered earlier; only the staged copy is left to remove
            self.finish(staging, entry);
            return DeliveryResult {
                success: true,
                ..result
            };
        }

        match staging.load(&entry.stage_ref) {
            Ok(Some(raw)) => self.send_staged(account, staging, entry, &raw, result),
            Ok(None) => {
                let error = format!(
                    "staged copy {} is missing from {}",
                    entry.stage_ref,
                    staging.describe()
                );
                error!("{}", error);
                self.record(&entry.failed(error.clone()));
                result.stage_failed(error)
            }
            Err(err) => {
                warn!("Failed to load staged copy {}: {}", entry.stage_ref, err);
                self.record(&entry.failed(err.to_string()));
                result.send_failed(err.to_string())
            }
        }
    }

    /// Drop the staged copy and ledger entry of a delivered message
    ///
    /// The entry is marked sent first, so a crash part-way leaves a sent
    /// entry whose removal the next retry completes.
    fn finish(&self, staging: &dyn StagingStore, entry: OutboxEntry) {
        let entry = match entry.status {
            OutboxStatus::Sent => entry,
            _ => entry.sent(None),
        };
        self.record(&entry);

        match staging.remove(&entry.stage_ref) {
            Ok(()) => {
                if let Err(err) = self.outbox.remove(&entry.id) {
                    warn!("Failed to drop outbox entry {}: {:#}", entry.id, err);
                }
            }
            Err(err) => {
                warn!(
                    "Delivered {} but could not remove its staged copy: {}",
                    entry.message_id, err
                );
                self.record(&OutboxEntry {
                    last_error: Some(err.to_string()),
                    ..entry
                });
            }
        }
    }

    fn record(&self, entry: &OutboxEntry) {
        if let Err(err) = self.outbox.save(entry) {
            warn!("Failed to update outbox entry {}: {:#}", entry.id, err);
        }
    }
}
