//! Wiring from configuration to engines

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use mail::storage::{OutboxStore, SqliteOutbox};
use mail::{
    Account, AccountManager, CourierConfig, DeliveryCoordinator, GmailApi, GmailMailbox,
    GmailTransport, MailboxClient, StagingConfig,
};

/// Loaded configuration plus the API clients built from it
pub struct Context {
    pub config: CourierConfig,
    apis: HashMap<String, Arc<GmailApi>>,
}

impl Context {
    /// Load `path`, or `courier.json` from the config directory
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => CourierConfig::from_file(path)?,
            None => CourierConfig::load()?,
        };
        Ok(Self {
            config,
            apis: HashMap::new(),
        })
    }

    /// Account by id, or the default sending account
    pub fn account(&self, id: Option<&str>) -> Result<Account> {
        self.config.account(id).cloned()
    }

    fn api(&mut self, transport_id: &str) -> Result<Arc<GmailApi>> {
        if let Some(api) = self.apis.get(transport_id) {
            return Ok(api.clone());
        }
        let transport = self
            .config
            .transport(transport_id)
            .with_context(|| format!("Unknown transport {}", transport_id))?;
        let api = mail::gmail::api_from_config(transport, self.config.watch.call_timeout())?;
        self.apis.insert(transport_id.to_string(), api.clone());
        Ok(api)
    }

    /// Mailbox client for an account, using its credential reference if set
    pub fn mailbox(&mut self, account: &Account) -> Result<GmailMailbox> {
        let credential = account
            .credential_ref
            .as_deref()
            .unwrap_or(&account.transport)
            .to_string();
        Ok(GmailMailbox::new(self.api(&credential)?))
    }

    /// Delivery coordinator over every configured account and transport
    pub fn coordinator(&mut self) -> Result<DeliveryCoordinator> {
        let mut manager = AccountManager::new();

        let transport_ids: Vec<String> = self
            .config
            .transports
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        for id in transport_ids {
            let api = self.api(&id)?;
            manager.add_transport(Arc::new(GmailTransport::new(id, api)));
        }

        for account in self.config.accounts.clone() {
            let staging_client: Option<Box<dyn MailboxClient>> = match account.staging {
                StagingConfig::Mailbox { .. } => Some(Box::new(self.mailbox(&account)?)),
                StagingConfig::File { .. } => None,
            };
            let id = account.id.clone();
            manager.add_account(account)?;
            manager.configure_staging(&id, staging_client)?;
        }

        let db_path = self
            .config
            .outbox_db_path()
            .context("Could not determine outbox database path")?;
        let outbox: Arc<dyn OutboxStore> = Arc::new(SqliteOutbox::new(&db_path)?);

        Ok(DeliveryCoordinator::new(manager, outbox))
    }
}
