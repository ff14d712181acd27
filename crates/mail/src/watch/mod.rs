//! Push-notification monitoring
//!
//! A [`MailboxWatcher`] drives one [`MailboxClient`](crate::client::MailboxClient)
//! through the [`WatchState`] machine and reports to an [`EventSink`].

mod clock;
mod event;
mod session;
mod watcher;

pub use clock::{CancelFlag, Clock, FakeClock, SystemClock};
pub use event::{EventSink, JsonLinesSink, MessageNotice, WatchEvent};
pub use session::{WatchSession, WatchState};
pub use watcher::{MailboxWatcher, WatchSummary};
