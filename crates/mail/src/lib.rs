//! Mail crate - Business logic for Courier
//!
//! This crate provides:
//! - Domain models (Message, Thread, Account, OutgoingMessage)
//! - Conversation threading over fetched batches
//! - Mailbox client and transport traits, with in-memory and Gmail
//!   implementations
//! - A push-notification watcher with reconnect and restart handling
//! - Staged, multi-account delivery with fallback transports and a
//!   durable outbox ledger
//!
//! The crate is synchronous; callers that need concurrency run the watcher
//! on a worker thread and share its [`watch::CancelFlag`].

pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod gmail;
pub mod models;
pub mod storage;
pub mod threading;
pub mod watch;

pub use client::{InMemoryMailbox, InMemoryTransport, MailboxClient, SearchCriteria, Transport};
pub use config::{CourierConfig, GmailCredentials, TransportConfig, WatchConfig};
pub use delivery::{AccountManager, DeliveryCoordinator, DeliveryResult, FailureSeverity};
pub use error::{MailError, MailResult};
pub use gmail::{GmailApi, GmailAuth, GmailMailbox, GmailTransport};
pub use models::{
    Account, EmailAddress, Message, MessageId, OutboxEntry, OutboxStatus, OutgoingMessage,
    StagingConfig, Thread, ThreadId,
};
pub use storage::{
    FileStagingStore, InMemoryOutbox, MailboxStaging, OutboxStore, SqliteOutbox, StagingStore,
};
pub use threading::{ThreadReport, build_threads};
pub use watch::{CancelFlag, EventSink, JsonLinesSink, MailboxWatcher, WatchEvent, WatchSummary};
