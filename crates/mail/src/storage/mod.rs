//! Storage traits and implementations
//!
//! Two concerns live here: staging stores that hold outbound messages until
//! delivery is confirmed, and the outbox ledger that tracks them. Both are
//! trait-based so the coordinator works the same against memory, local
//! files, SQLite or a provider-side folder.

mod memory;
mod sqlite;
mod staging_file;
mod staging_mailbox;
mod traits;

pub use memory::InMemoryOutbox;
pub use sqlite::SqliteOutbox;
pub use staging_file::FileStagingStore;
pub use staging_mailbox::MailboxStaging;
pub use traits::{OutboxStore, StagingStore};
