//! Session timing: the clock seam and the two deadlines built on it,
//! the hello cutoff and the client ping rate limit.

use std::time::{Duration, Instant};

/// Clock abstraction so session deadlines stay testable.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> tokio::time::Sleep;
}

/// System-backed clock; replaceable in tests.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> tokio::time::Sleep {
        tokio::time::sleep(duration)
    }
}

/// Fixed cutoff for a session that has not completed hello.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(now: Instant, timeout: Duration) -> Self {
        Self(now + timeout)
    }

    /// Time left before the cutoff; zero once it has passed, which
    /// makes a sleep on it an immediate wake.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.0.saturating_duration_since(now)
    }
}

/// Client ping rate limit. Pings spaced closer than the configured
/// minimum are abusive and terminate the session; a zero interval
/// disables the limit.
#[derive(Debug, Clone, Copy)]
pub struct PingGate {
    min_interval: Duration,
}

impl PingGate {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    /// Whether a ping arriving at `now` is allowed, given the time
    /// of the session's previous client ping.
    pub fn permits(&self, last_ping: Option<Instant>, now: Instant) -> bool {
        if self.min_interval.is_zero() {
            return true;
        }
        match last_ping {
            Some(last) => now.duration_since(last) >= self.min_interval,
            None => true,
        }
    }
}
