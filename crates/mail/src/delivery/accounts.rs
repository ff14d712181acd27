//! Account and transport registry used by the delivery code

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::client::{MailboxClient, Transport};
use crate::models::{Account, StagingConfig};
use crate::storage::{FileStagingStore, MailboxStaging, StagingStore};

/// Accounts, the transports they send through and their staging stores
///
/// Built once at startup and read-only afterwards, so it can be shared
/// freely between delivery threads.
#[derive(Default)]
pub struct AccountManager {
    accounts: Vec<Account>,
    transports: HashMap<String, Arc<dyn Transport>>,
    staging: HashMap<String, Arc<dyn StagingStore>>,
}

impl AccountManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account; ids must be unique
    pub fn add_account(&mut self, account: Account) -> Result<()> {
        if self.account(&account.id).is_some() {
            bail!("Account {} is already registered", account.id);
        }
        self.accounts.push(account);
        Ok(())
    }

    /// Register a transport under its own id, replacing any previous one
    pub fn add_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transports.insert(transport.id().to_string(), transport);
    }

    /// Use `store` for staging the account's outbound messages
    pub fn set_staging(&mut self, account_id: &str, store: Arc<dyn StagingStore>) {
        self.staging.insert(account_id.to_string(), store);
    }

    /// Create the staging store described by the account's configuration
    ///
    /// Mailbox staging needs a client for the account's mailbox; file
    /// staging ignores it.
    pub fn configure_staging(
        &mut self,
        account_id: &str,
        mailbox: Option<Box<dyn MailboxClient>>,
    ) -> Result<()> {
        let Some(account) = self.account(account_id) else {
            bail!("Unknown account {}", account_id);
        };

        let store: Arc<dyn StagingStore> = match &account.staging {
            StagingConfig::File { path } => Arc::new(FileStagingStore::new(path)?),
            StagingConfig::Mailbox { folder } => match mailbox {
                Some(client) => Arc::new(MailboxStaging::new(client, folder.clone())),
                None => bail!(
                    "Account {} stages in folder {} but has no mailbox client",
                    account_id,
                    folder
                ),
            },
        };
        self.set_staging(account_id, store);
        Ok(())
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    /// The account flagged as default sender, else the first registered
    pub fn default_account(&self) -> Option<&Account> {
        Account::default_in(&self.accounts)
    }

    /// From header for an account, if it has an address
    pub fn get_sender(&self, account_id: &str) -> Option<String> {
        self.account(account_id).and_then(Account::sender)
    }

    pub fn transport(&self, id: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(id).cloned()
    }

    pub fn staging(&self, account_id: &str) -> Option<Arc<dyn StagingStore>> {
        self.staging.get(account_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryTransport;

    fn manager() -> AccountManager {
        let mut manager = AccountManager::new();
        manager
            .add_account(Account::new("work", "me@work.example", "smtp").with_display_name("Me"))
            .unwrap();
        manager
            .add_account(Account::new("home", "me@home.example", "smtp").with_default_sender(true))
            .unwrap();
        manager.add_transport(Arc::new(InMemoryTransport::new("smtp")));
        manager
    }

    #[test]
    fn test_lookup() {
        let manager = manager();
        assert_eq!(manager.accounts().len(), 2);
        assert_eq!(manager.default_account().unwrap().id, "home");
        assert_eq!(
            manager.get_sender("work").as_deref(),
            Some("Me <me@work.example>")
        );
        assert!(manager.get_sender("nobody").is_none());
        assert!(manager.transport("smtp").is_some());
        assert!(manager.transport("api").is_none());
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let mut manager = manager();
        assert!(manager.add_account(Account::new("work", "x@y", "smtp")).is_err());
    }

    #[test]
    fn test_default_account_falls_back_to_first() {
        let mut manager = AccountManager::new();
        assert!(manager.default_account().is_none());
        manager.add_account(Account::new("a", "a@x", "t")).unwrap();
        assert_eq!(manager.default_account().unwrap().id, "a");
    }

    #[test]
    fn test_configure_staging() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager();
        manager
            .add_account(
                Account::new("local", "me@local.example", "smtp").with_staging(StagingConfig::File {
                    path: dir.path().join("staging"),
                }),
            )
            .unwrap();

        manager.configure_staging("local", None).unwrap();
        assert!(manager.staging("local").is_some());

        // Mailbox staging without a client is a configuration error
        assert!(manager.configure_staging("work", None).is_err());
        assert!(manager.staging("work").is_none());
    }
}
