//! Conversation threading
//!
//! [`build_threads`] turns one fetched batch into threads without further
//! I/O; [`ThreadReport`] is the JSON document callers emit for it.

mod builder;
mod report;

pub use builder::build_threads;
pub use report::{MessageSummary, ThreadReport, ThreadSummary};
