//! Push-notification watcher
//!
//! [`MailboxWatcher`] keeps one connection open to one folder and turns the
//! server's new-data signals into [`WatchEvent`]s. Push-waits are polled in
//! short slices so cancellation is noticed quickly, and restarted before the
//! server's ceiling (~30 minutes, after which NAT boxes and servers drop
//! silent connections). Any connection failure tears the connection down
//! and rebuilds it after a fixed delay, forever, until cancelled.

use std::sync::Arc;
use std::time::Duration;

use log::{Level, debug, info, warn};
use serde::{Deserialize, Serialize};

use super::clock::{CancelFlag, Clock, SystemClock};
use super::event::{EventSink, WatchEvent};
use super::session::{WatchSession, WatchState};
use crate::client::{IdleResponse, MailboxClient};
use crate::config::WatchConfig;
use crate::error::MailError;

/// Counters reported when [`MailboxWatcher::run`] returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSummary {
    /// `NewMail` events emitted
    pub events: u64,
    /// Successful connections after a lost one
    pub reconnects: u64,
    /// Push-waits restarted before the ceiling
    pub restarts: u64,
    /// Errors reported to the sink
    pub errors: u64,
}

/// Long-running watcher for one account folder
pub struct MailboxWatcher<C: MailboxClient> {
    client: C,
    account: String,
    config: WatchConfig,
    clock: Arc<dyn Clock>,
    cancel: CancelFlag,
    state: WatchState,
    session: Option<WatchSession>,
    last_error: Option<MailError>,
    summary: WatchSummary,
    connected_once: bool,
}

impl<C: MailboxClient> MailboxWatcher<C> {
    pub fn new(client: C, account: impl Into<String>, config: WatchConfig) -> Self {
        Self {
            client,
            account: account.into(),
            config,
            clock: Arc::new(SystemClock::new()),
            cancel: CancelFlag::new(),
            state: WatchState::Disconnected,
            session: None,
            last_error: None,
            summary: WatchSummary::default(),
            connected_once: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a flag owned by the caller to stop the watcher
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops [`run`](Self::run) at its next loop boundary
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn summary(&self) -> WatchSummary {
        self.summary
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn into_client(self) -> C {
        self.client
    }

    /// Watch until cancelled or until `max_events` events were emitted
    ///
    /// Network errors never escape: they are reported to `sink` and the
    /// connection is rebuilt.
    pub fn run(&mut self, sink: &mut dyn EventSink) -> WatchSummary {
        self.summary = WatchSummary::default();
        self.state = WatchState::Disconnected;
        self.connected_once = false;

        info!(
            "Watching {} for {} (restart after {}s, poll every {}s)",
            self.config.folder,
            self.account,
            self.config.restart_after().as_secs(),
            self.config.poll_interval().as_secs()
        );

        while !self.cancel.is_cancelled() && !self.limit_reached() {
            let next = match self.state {
                WatchState::Disconnected => self.connect(sink),
                WatchState::Connected => self.start_wait(),
                WatchState::Idling => self.poll(),
                WatchState::EventDetected => self.handle_new_data(sink),
                WatchState::TimeoutNear => self.restart_wait(),
                WatchState::TransportError => self.recover(sink),
            };
            if next != self.state {
                debug!(
                    "Watcher {}: {} -> {}",
                    self.account,
                    self.state.as_str(),
                    next.as_str()
                );
            }
            self.state = next;
        }

        if self.session.is_some() {
            self.teardown();
        }
        self.state = WatchState::Disconnected;

        info!(
            "Stopped watching {} for {}: {} events, {} reconnects, {} restarts",
            self.config.folder,
            self.account,
            self.summary.events,
            self.summary.reconnects,
            self.summary.restarts
        );
        self.summary
    }

    fn limit_reached(&self) -> bool {
        self.config.max_events > 0 && self.summary.events >= self.config.max_events
    }

    fn connect(&mut self, sink: &mut dyn EventSink) -> WatchState {
        if let Err(err) = self.client.connect() {
            return self.fail(err);
        }

        if self.connected_once {
            self.summary.reconnects += 1;
            info!("Reconnected {} for {}", self.config.folder, self.account);
        } else {
            info!("Connected {} for {}", self.config.folder, self.account);
        }
        self.connected_once = true;

        self.session = Some(WatchSession::new(
            self.config.poll_interval(),
            self.config.restart_after(),
        ));
        let message = format!("watching {} for {}", self.config.folder, self.account);
        self.emit(sink, WatchEvent::log(Level::Info, message));
        WatchState::Connected
    }

    fn start_wait(&mut self) -> WatchState {
        let timeout = self.config.idle_timeout();
        if let Err(err) = self.client.idle_start(&self.config.folder, timeout) {
            return self.fail(err);
        }
        let now = self.clock.now();
        if let Some(session) = self.session.as_mut() {
            session.begin_wait(now);
        }
        WatchState::Idling
    }

    fn poll(&mut self) -> WatchState {
        let now = self.clock.now();
        let Some(session) = self.session.as_ref() else {
            return WatchState::Disconnected;
        };
        if session.should_restart(now) {
            return WatchState::TimeoutNear;
        }

        let slice = session.next_slice(now);
        match self.client.idle_check(slice) {
            Ok(responses) if responses.iter().any(IdleResponse::is_new_data) => {
                WatchState::EventDetected
            }
            Ok(_) => WatchState::Idling,
            Err(err) => self.fail(err),
        }
    }

    fn handle_new_data(&mut self, sink: &mut dyn EventSink) -> WatchState {
        if let Err(err) = self.end_wait() {
            return self.fail(err);
        }

        let folder = self.config.folder.clone();
        let messages = match self.client.fetch_unread(&folder, self.config.fetch_limit) {
            Ok(messages) => messages,
            Err(err) if err.is_not_found() => {
                warn!("Unread fetch in {} found nothing: {}", folder, err);
                Vec::new()
            }
            Err(err @ MailError::Protocol(_)) => {
                warn!("Unread fetch in {} rejected: {}", folder, err);
                self.summary.errors += 1;
                let event = WatchEvent::Error {
                    account: self.account.clone(),
                    folder,
                    message: err.to_string(),
                    retry_in_secs: None,
                };
                self.emit(sink, event);
                return WatchState::Connected;
            }
            Err(err) => return self.fail(err),
        };

        self.summary.events += 1;
        info!(
            "{} unread message(s) in {} for {}",
            messages.len(),
            folder,
            self.account
        );
        let event = WatchEvent::new_mail(&self.account, &folder, self.summary.events, &messages);
        self.emit(sink, event);
        WatchState::Connected
    }

    fn restart_wait(&mut self) -> WatchState {
        debug!(
            "Restarting wait on {} for {} before the server ceiling",
            self.config.folder, self.account
        );
        match self.end_wait() {
            Ok(()) => {
                self.summary.restarts += 1;
                WatchState::Connected
            }
            Err(err) => self.fail(err),
        }
    }

    fn recover(&mut self, sink: &mut dyn EventSink) -> WatchState {
        let delay = self.config.reconnect_delay();
        let message = self
            .last_error
            .take()
            .map(|err| err.to_string())
            .unwrap_or_else(|| "connection lost".to_string());

        warn!(
            "Watcher for {} failed: {}; reconnecting in {}s",
            self.account,
            message,
            delay.as_secs()
        );
        self.summary.errors += 1;
        let event = WatchEvent::Error {
            account: self.account.clone(),
            folder: self.config.folder.clone(),
            message,
            retry_in_secs: Some(delay.as_secs()),
        };
        self.emit(sink, event);

        self.teardown();
        self.sleep_cancellable(delay);
        WatchState::Disconnected
    }

    fn fail(&mut self, err: MailError) -> WatchState {
        self.last_error = Some(err);
        WatchState::TransportError
    }

    fn end_wait(&mut self) -> Result<(), MailError> {
        self.client.idle_done()?;
        if let Some(session) = self.session.as_mut() {
            session.end_wait();
        }
        Ok(())
    }

    /// Drop the session and close the connection, ignoring errors
    fn teardown(&mut self) {
        if let Some(session) = self.session.take()
            && session.is_waiting()
            && let Err(err) = self.client.idle_done()
        {
            debug!("Ignoring error while ending wait: {}", err);
        }
        if let Err(err) = self.client.disconnect() {
            debug!("Ignoring error while disconnecting: {}", err);
        }
    }

    /// Sleep in poll-sized slices so cancellation interrupts the delay
    fn sleep_cancellable(&self, duration: Duration) {
        let step = self.config.poll_interval();
        let mut remaining = duration;
        while !remaining.is_zero() && !self.cancel.is_cancelled() {
            let slice = remaining.min(step);
            self.clock.sleep(slice);
            remaining -= slice;
        }
    }

    fn emit(&self, sink: &mut dyn EventSink, event: WatchEvent) {
        if let Err(err) = sink.emit(event) {
            warn!("Failed to deliver watcher event: {:#}", err);
        }
    }
}
