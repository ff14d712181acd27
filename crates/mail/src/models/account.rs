//! Account model describing a sending/receiving mail account

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where an account durably stages outbound messages before sending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagingConfig {
    /// Append to a provider-side folder (e.g. "Outbox" or "DRAFT")
    Mailbox { folder: String },
    /// Keep compressed copies in a local directory
    File { path: PathBuf },
}

impl Default for StagingConfig {
    fn default() -> Self {
        StagingConfig::Mailbox {
            folder: "Outbox".to_string(),
        }
    }
}

/// A configured mail account
///
/// Read-only from the delivery and watch code; loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier used on the command line and in results
    pub id: String,
    /// Email address (used as the default sender)
    pub email: String,
    /// Display name for the From header
    #[serde(default)]
    pub display_name: Option<String>,
    /// Primary transport id
    pub transport: String,
    /// Secondary transport tried once when the primary fails
    #[serde(default)]
    pub fallback_transport: Option<String>,
    /// Staging location for outbound messages
    #[serde(default)]
    pub staging: StagingConfig,
    /// Reference to the credential used by the mailbox client
    #[serde(default)]
    pub credential_ref: Option<String>,
    /// Whether this is the default sending account
    #[serde(default)]
    pub is_default_sender: bool,
}

impl Account {
    /// Create an account using `transport` as its primary transport
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        transport: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            display_name: None,
            transport: transport.into(),
            fallback_transport: None,
            staging: StagingConfig::default(),
            credential_ref: None,
            is_default_sender: false,
        }
    }

    /// Set display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the fallback transport
    pub fn with_fallback(mut self, transport: impl Into<String>) -> Self {
        self.fallback_transport = Some(transport.into());
        self
    }

    /// Set the staging location
    pub fn with_staging(mut self, staging: StagingConfig) -> Self {
        self.staging = staging;
        self
    }

    /// Mark as the default sending account
    pub fn with_default_sender(mut self, is_default: bool) -> Self {
        self.is_default_sender = is_default;
        self
    }

    /// Sender address for the From header, if the account has one
    pub fn sender(&self) -> Option<String> {
        let email = self.email.trim();
        if email.is_empty() {
            return None;
        }
        Some(match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, email),
            _ => email.to_string(),
        })
    }

    /// The account flagged as default sender, else the first one
    pub fn default_in(accounts: &[Account]) -> Option<&Account> {
        accounts
            .iter()
            .find(|a| a.is_default_sender)
            .or_else(|| accounts.first())
    }

    /// Domain part of the address, used when generating Message-IDs
    pub fn domain(&self) -> &str {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|d| !d.is_empty())
            .unwrap_or("localhost")
    }
}
