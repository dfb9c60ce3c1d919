// Refresh debouncing and event throttling.
//
// At most one refresh is pending at any time. A new request replaces the
// pending one (its `animated` flag wins) and is due no sooner than a short
// coalescing delay after it arrives, and no sooner than the minimum spacing
// after the previous refresh started. Late requests are delayed, never
// dropped.
//
// Throttles are the opposite: events arriving inside the interval schedule
// nothing of their own. The caller leaves one trailing request for when the
// interval closes, so the last event of a burst is never lost.

use std::time::{Duration, Instant};

/// Minimum gap between the starts of consecutive refresh executions.
pub const MIN_REFRESH_SPACING: Duration = Duration::from_millis(20);

/// Delay applied to every debounced request so bursts collapse.
pub const COALESCE_DELAY: Duration = Duration::from_millis(10);

/// Pointer-driven refresh attempts are admitted at most this often.
pub const POINTER_THROTTLE: Duration = Duration::from_millis(80);

/// Accessibility notifications closer together than this are discarded.
pub const ACCESSIBILITY_THROTTLE: Duration = Duration::from_millis(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRefresh {
    pub animated: bool,
    pub due: Instant,
}

#[derive(Debug, Default)]
pub struct RefreshDebouncer {
    pending: Option<PendingRefresh>,
    last_start: Option<Instant>,
}

impl RefreshDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a refresh, superseding any pending one. Returns how long the
    /// caller should wait before firing.
    pub fn request(&mut self, animated: bool, now: Instant) -> Duration {
        let due = self.earliest_due(now, COALESCE_DELAY);
        self.pending = Some(PendingRefresh { animated, due });
        due.saturating_duration_since(now)
    }

    /// Queue a refresh at least `delay` from now, unless one is already
    /// pending. Returns the wait to arm, or `None` when nothing was queued.
    pub fn request_after(&mut self, animated: bool, now: Instant, delay: Duration) -> Option<Duration> {
        if self.pending.is_some() {
            return None;
        }
        let due = self.earliest_due(now, delay.max(COALESCE_DELAY));
        self.pending = Some(PendingRefresh { animated, due });
        Some(due.saturating_duration_since(now))
    }

    fn earliest_due(&self, now: Instant, delay: Duration) -> Instant {
        let due = now + delay;
        match self.last_start {
            Some(last) => due.max(last + MIN_REFRESH_SPACING),
            None => due,
        }
    }

    /// Take the pending refresh if it is due. An early wakeup leaves it queued
    /// and reports the remaining delay instead.
    pub fn take_due(&mut self, now: Instant) -> Result<Option<PendingRefresh>, Duration> {
        match self.pending {
            None => Ok(None),
            Some(pending) if pending.due <= now => {
                self.pending = None;
                Ok(Some(pending))
            }
            Some(pending) => Err(pending.due - now),
        }
    }

    /// Record that a refresh started executing, whether debounced or direct.
    pub fn mark_started(&mut self, now: Instant) {
        self.last_start = Some(now);
    }

    pub fn cancel(&mut self) -> Option<PendingRefresh> {
        self.pending.take()
    }
}

/// Rejects events that arrive within `interval` of the last admitted one.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last_admitted: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_admitted: None }
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last_admitted {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_admitted = Some(now);
                true
            }
        }
    }

    /// Time until the next event would be admitted.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.last_admitted
            .map(|last| (last + self.interval).saturating_duration_since(now))
            .unwrap_or_default()
    }

    pub fn reset(&mut self) {
        self.last_admitted = None;
    }
}
