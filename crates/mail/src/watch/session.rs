//! Per-connection watcher state

use std::time::Duration;

/// Phase of the watcher's connection loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchState {
    /// No connection; the next step connects
    Disconnected,
    /// Connected with no push-wait outstanding
    Connected,
    /// A push-wait is outstanding and being polled in slices
    Idling,
    /// The server announced new messages
    EventDetected,
    /// The wait is close to the server's ceiling and must be restarted
    TimeoutNear,
    /// A call failed; the connection is torn down and rebuilt after a delay
    TransportError,
}

impl WatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchState::Disconnected => "disconnected",
            WatchState::Connected => "connected",
            WatchState::Idling => "idling",
            WatchState::EventDetected => "event_detected",
            WatchState::TimeoutNear => "timeout_near",
            WatchState::TransportError => "transport_error",
        }
    }
}

/// State of one watcher connection
///
/// Created on every successful connect and dropped on disconnect, so nothing
/// carries over from a broken connection.
#[derive(Debug, Clone)]
pub struct WatchSession {
    /// Slice length handed to each `idle_check`
    pub poll_interval: Duration,
    restart_after: Duration,
    /// Clock reading at which the outstanding wait must be restarted
    idle_deadline: Option<Duration>,
}

impl WatchSession {
    pub fn new(poll_interval: Duration, restart_after: Duration) -> Self {
        Self {
            poll_interval,
            restart_after,
            idle_deadline: None,
        }
    }

    /// Record that a push-wait started at `now`
    pub fn begin_wait(&mut self, now: Duration) {
        self.idle_deadline = Some(now + self.restart_after);
    }

    /// Record that the push-wait was terminated
    pub fn end_wait(&mut self) {
        self.idle_deadline = None;
    }

    pub fn is_waiting(&self) -> bool {
        self.idle_deadline.is_some()
    }

    pub fn idle_deadline(&self) -> Option<Duration> {
        self.idle_deadline
    }

    /// Whether the outstanding wait has reached its restart point
    pub fn should_restart(&self, now: Duration) -> bool {
        self.idle_deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Length of the next poll slice, never overshooting the restart point
    pub fn next_slice(&self, now: Duration) -> Duration {
        match self.idle_deadline {
            Some(deadline) => self.poll_interval.min(deadline.saturating_sub(now)),
            None => self.poll_interval,
        }
    }
}
