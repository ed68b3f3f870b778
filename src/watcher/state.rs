//! Watch-target state machine and reconnect backoff
//!
//! The per-target lifecycle is an explicit tagged state with transitions as
//! a total pure function, so the reconnect logic is testable without a
//! store connection. The watcher's run loop drives these transitions; the
//! states here mirror what it actually does.

use std::time::Duration;

/// Lifecycle state of one (account, folder) target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Opening a connection, authenticating, acquiring the folder hold.
    Connecting,
    /// Subscribed and passively waiting for push signals.
    Idle,
    /// Fetching summaries after a count-increase signal.
    Notifying,
    /// Waiting out a backoff delay before the next connect attempt.
    Reconnecting,
    /// Terminal; entered only via `stop()` or an exhausted attempt cap.
    Stopped,
}

/// Events that drive target transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEvent {
    Connected,
    ConnectFailed,
    CountIncreased,
    FetchFinished,
    ConnectionClosed,
    RetryDue,
    Stop,
}

/// Total transition function. Unknown (state, event) combinations keep the
/// current state, so a stale event arriving after a transition is harmless.
pub fn transition(state: TargetState, event: TargetEvent) -> TargetState {
    use TargetEvent::*;
    use TargetState::*;

    match (state, event) {
        (_, Stop) => Stopped,
        (Stopped, _) => Stopped,

        (Connecting, Connected) => Idle,
        (Connecting, ConnectFailed) => Reconnecting,

        (Idle, CountIncreased) => Notifying,
        (Idle, ConnectionClosed) => Reconnecting,

        // Fetch failures are swallowed; either way the target goes back to
        // waiting and retries the same range on the next signal.
        (Notifying, FetchFinished) => Idle,
        (Notifying, ConnectionClosed) => Reconnecting,

        (Reconnecting, RetryDue) => Connecting,

        (state, _) => state,
    }
}

/// Exponential reconnect backoff: starts at `initial`, doubles on every
/// consecutive failure, saturates at `max`, resets on success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait before the next attempt. Advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
