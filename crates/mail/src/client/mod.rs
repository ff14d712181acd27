//! Mailbox protocol clients and outbound transports
//!
//! [`MailboxClient`] and [`Transport`] are the seams every engine talks
//! through. The in-memory implementations back tests and dry runs; the
//! Gmail adapter lives in [`crate::gmail`].

mod headers;
mod memory;
mod traits;

pub use headers::{message_from_headers, parse_date, parse_header_block, parse_message};
pub use memory::{
    CallRecord, IdleStep, InMemoryMailbox, InMemoryTransport, MailboxOp, SentMessage,
};
pub use traits::{
    FolderInfo, FolderStatus, IdleResponse, MailboxClient, MessageRef, SearchCriteria, Transport,
};
