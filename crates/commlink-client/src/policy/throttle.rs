//! Send throttles for the periodic duties.
//!
//! Both take the current instant as a parameter so callers decide the clock
//! (tokio's, which tests can pause).

use std::time::Duration;

use tokio::time::Instant;

use commlink_core::protocol::Position;

/// Rate limit for position updates driven by local movement.
///
/// An update is sent only if more than `min_interval` passed since the last
/// send, and an unchanged pose is not resent before `keepalive`. A changed
/// pose refused inside the window is held as pending until [`flush_at`].
///
/// [`flush_at`]: PositionThrottle::flush_at
#[derive(Debug)]
pub struct PositionThrottle {
    min_interval: Duration,
    keepalive: Duration,
    last: Option<(Instant, Position)>,
    pending: Option<Position>,
}

impl PositionThrottle {
    pub fn new(min_interval: Duration, keepalive: Duration) -> Self {
        Self {
            min_interval,
            keepalive,
            last: None,
            pending: None,
        }
    }

    /// Records the send when it returns true.
    pub fn should_send(&mut self, position: &Position, now: Instant) -> bool {
        if let Some((at, sent)) = &self.last {
            let elapsed = now.saturating_duration_since(*at);
            if elapsed < self.keepalive && sent.same_pose(position) {
                self.pending = None;
                return false;
            }
            if elapsed <= self.min_interval {
                self.pending = Some(*position);
                return false;
            }
        }
        self.record(position, now);
        true
    }

    /// Note a send that bypassed the throttle (heartbeat, room change).
    pub fn record(&mut self, position: &Position, now: Instant) {
        self.last = Some((now, *position));
        self.pending = None;
    }

    /// When the pending pose is due, if there is one.
    pub fn flush_at(&self) -> Option<Instant> {
        match (&self.pending, &self.last) {
            (Some(_), Some((at, _))) => Some(*at + self.min_interval),
            _ => None,
        }
    }

    /// Takes the pending pose and records it as sent at `now`.
    pub fn take_pending(&mut self, now: Instant) -> Option<Position> {
        let position = self.pending.take()?;
        self.record(&position, now);
        Some(position)
    }
}

/// At most one profile response per `min_interval`.
///
/// The window is shared by every requester: a response to one peer delays
/// the answer to any other peer asking within the same window.
#[derive(Debug)]
pub struct ResponseThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl ResponseThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}
