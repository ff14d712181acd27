//! Domain models for mail entities

mod account;
mod message;
mod outbox;
mod outgoing;
mod thread;

pub use account::{Account, StagingConfig};
pub use message::{EmailAddress, Message, MessageBuilder, MessageId};
pub use outbox::{OutboxEntry, OutboxStatus};
pub use outgoing::OutgoingMessage;
pub use thread::{Thread, ThreadId};
