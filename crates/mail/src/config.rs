//! Configuration loading for mail services
//!
//! `courier.json` in the config directory describes accounts, transports,
//! watcher timing and the outbox database. Every section has defaults, so a
//! missing file yields a usable (if account-less) configuration.
//!
//! Gmail OAuth client credentials load from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format)
//! 3. Runtime environment variables (fallback)

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::Account;

/// Main config filename in the Courier config directory
pub const CONFIG_FILE: &str = "courier.json";

/// Credentials filename in the Courier config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Default outbox database filename
const OUTBOX_DB_FILE: &str = "outbox.db";

/// Timing and batching of the mailbox watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Folder to watch
    pub folder: String,
    /// Ceiling of one push-wait; servers drop waits older than ~30 minutes
    pub idle_timeout_secs: u64,
    /// Length of one wait slice
    pub poll_interval_secs: u64,
    /// Restart the wait this long before the ceiling
    pub safety_margin_secs: u64,
    /// Fixed delay before reconnecting after an error
    pub reconnect_delay_secs: u64,
    /// Unread messages fetched per event
    pub fetch_limit: usize,
    /// Stop after this many events (0 = run until cancelled)
    pub max_events: u64,
    /// Timeout applied to each network call
    pub call_timeout_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            folder: "INBOX".to_string(),
            idle_timeout_secs: 29 * 60,
            poll_interval_secs: 30,
            safety_margin_secs: 60,
            reconnect_delay_secs: 5,
            fetch_limit: 10,
            max_events: 0,
            call_timeout_secs: 30,
        }
    }
}

impl WatchConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.safety_margin_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    /// How long a wait may run before it is proactively restarted
    ///
    /// A margin at or above the ceiling would restart immediately, so the
    /// full ceiling is used instead.
    pub fn restart_after(&self) -> Duration {
        let ceiling = self.idle_timeout();
        match ceiling.checked_sub(self.safety_margin()) {
            Some(d) if !d.is_zero() => d,
            _ => ceiling,
        }
    }
}

/// How to reach an outbound transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Gmail API with an OAuth token
    Gmail {
        id: String,
        /// Google Cloud credential file; defaults to the shared one
        #[serde(default)]
        credentials_file: Option<PathBuf>,
        /// Where the OAuth token is cached; defaults to `gmail-token-<id>.json`
        #[serde(default)]
        token_file: Option<PathBuf>,
    },
}

impl TransportConfig {
    pub fn id(&self) -> &str {
        match self {
            TransportConfig::Gmail { id, .. } => id,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub accounts: Vec<Account>,
    pub transports: Vec<TransportConfig>,
    pub watch: WatchConfig,
    /// Outbox ledger database; defaults to `outbox.db` in the config directory
    pub outbox_db: Option<PathBuf>,
}

impl CourierConfig {
    /// Load `courier.json` from the config directory, or defaults when absent
    pub fn load() -> Result<Self> {
        let config: Self = config::load_json_or_default(CONFIG_FILE)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = config::load_json_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Check ids are unique and every referenced transport exists
    pub fn validate(&self) -> Result<()> {
        let mut transport_ids = HashSet::new();
        for transport in &self.transports {
            if !transport_ids.insert(transport.id()) {
                bail!("Duplicate transport id: {}", transport.id());
            }
        }

        let mut account_ids = HashSet::new();
        for account in &self.accounts {
            if !account_ids.insert(account.id.as_str()) {
                bail!("Duplicate account id: {}", account.id);
            }
            let referenced = std::iter::once(&account.transport)
                .chain(account.fallback_transport.iter())
                .chain(account.credential_ref.iter());
            for transport in referenced {
                if !transport_ids.contains(transport.as_str()) {
                    bail!(
                        "Account {} references unknown transport {}",
                        account.id,
                        transport
                    );
                }
            }
        }

        if self.accounts.iter().filter(|a| a.is_default_sender).count() > 1 {
            bail!("More than one account is marked as default sender");
        }

        Ok(())
    }

    /// Resolve the outbox database path
    pub fn outbox_db_path(&self) -> Option<PathBuf> {
        self.outbox_db
            .clone()
            .or_else(|| config::config_path(OUTBOX_DB_FILE))
    }

    pub fn transport(&self, id: &str) -> Option<&TransportConfig> {
        self.transports.iter().find(|t| t.id() == id)
    }

    /// Account by id, or the default sending account when `id` is `None`
    pub fn account(&self, id: Option<&str>) -> Result<&Account> {
        match id {
            Some(id) => self
                .accounts
                .iter()
                .find(|a| a.id == id)
                .with_context(|| format!("Unknown account {}", id)),
            None => Account::default_in(&self.accounts).context("No accounts configured"),
        }
    }
}

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials (for production builds)
    /// 2. `file`, or ~/.config/courier/google-credentials.json
    /// 3. Runtime environment variables
    pub fn load(file: Option<&Path>) -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if let Some(path) = file {
            return Self::from_file(path);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Get the default credentials file path
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "accounts": [
            {
                "id": "work",
                "email": "me@work.example",
                "display_name": "Me",
                "transport": "work-gmail",
                "fallback_transport": "home-gmail",
                "staging": { "kind": "mailbox", "folder": "DRAFT" },
                "is_default_sender": true
            }
        ],
        "transports": [
            { "kind": "gmail", "id": "work-gmail" },
            { "kind": "gmail", "id": "home-gmail", "token_file": "/tmp/home.json" }
        ],
        "watch": { "poll_interval_secs": 10 }
    }"#;

    #[test]
    fn test_parse_full_config() {
        let config = CourierConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(config.accounts[0].fallback_transport.as_deref(), Some("home-gmail"));
        assert_eq!(config.transports[1].id(), "home-gmail");
        assert!(config.transport("work-gmail").is_some());

        // Unspecified watch fields keep their defaults
        assert_eq!(config.watch.poll_interval_secs, 10);
        assert_eq!(config.watch.idle_timeout_secs, 29 * 60);
        assert_eq!(config.watch.folder, "INBOX");
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = CourierConfig::from_json("{}").unwrap();
        assert!(config.accounts.is_empty());
        assert_eq!(config.watch, WatchConfig::default());
        assert!(config.account(None).is_err());
    }

    #[test]
    fn test_account_selection() {
        let json = r#"{
            "accounts": [
                { "id": "work", "email": "me@work.example", "transport": "gmail" },
                { "id": "home", "email": "me@home.example", "transport": "gmail", "is_default_sender": true }
            ],
            "transports": [{ "kind": "gmail", "id": "gmail" }]
        }"#;
        let config = CourierConfig::from_json(json).unwrap();

        assert_eq!(config.account(None).unwrap().id, "home");
        assert_eq!(config.account(Some("work")).unwrap().id, "work");
        let err = config.account(Some("other")).unwrap_err();
        assert!(err.to_string().contains("Unknown account other"));
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let json = r#"{
            "accounts": [{ "id": "a", "email": "a@x", "transport": "missing" }]
        }"#;
        let err = CourierConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("unknown transport"));
    }

    #[test]
    fn test_duplicate_accounts_rejected() {
        let json = r#"{
            "transports": [{ "kind": "gmail", "id": "t" }],
            "accounts": [
                { "id": "a", "email": "a@x", "transport": "t" },
                { "id": "a", "email": "b@x", "transport": "t" }
            ]
        }"#;
        assert!(CourierConfig::from_json(json).is_err());
    }

    #[test]
    fn test_watch_defaults() {
        let watch = WatchConfig::default();
        assert_eq!(watch.idle_timeout(), Duration::from_secs(1740));
        assert_eq!(watch.restart_after(), Duration::from_secs(1680));
        assert_eq!(watch.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(watch.fetch_limit, 10);
    }

    #[test]
    fn test_restart_after_with_oversized_margin() {
        let watch = WatchConfig {
            idle_timeout_secs: 30,
            safety_margin_secs: 60,
            ..WatchConfig::default()
        };
        assert_eq!(watch.restart_after(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_installed_credentials() {
        let json = r#"{
            "installed": {
                "client_id": "test-client-id.apps.googleusercontent.com",
                "client_secret": "test-secret",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;

        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "test-client-id.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "test-secret");
    }

    #[test]
    fn test_invalid_credentials_json() {
        let json = r#"{ "other": {} }"#;
        assert!(GmailCredentials::from_json(json).is_err());
    }
}
