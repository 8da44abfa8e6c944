//! In-process fallback time source.
//!
//! Produces the same events as the worker, but only when the owner pumps
//! it, at a coarser cadence. Used when the worker cannot be created or the
//! watchdog has given up on it.

use super::protocol::{Countdown, TimeSource, TimeSourceKind, TimerCommand, TimerEvent};
use crate::error::TimeSourceError;

pub struct IntervalTimeSource {
    interval_ms: u64,
    countdown: Countdown,
    next_tick_ms: u64,
}

impl IntervalTimeSource {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            countdown: Countdown::default(),
            next_tick_ms: 0,
        }
    }
}

impl TimeSource for IntervalTimeSource {
    fn kind(&self) -> TimeSourceKind {
        TimeSourceKind::Interval
    }

    fn send(&mut self, command: TimerCommand, now_ms: u64) -> Result<(), TimeSourceError> {
        self.countdown.apply(command, now_ms);
        self.next_tick_ms = now_ms.saturating_add(self.interval_ms);
        Ok(())
    }

    fn poll(&mut self, now_ms: u64) -> Vec<TimerEvent> {
        let mut out = Vec::new();
        if self.countdown.is_armed() && now_ms >= self.next_tick_ms {
            // A starved pump yields one catch-up tick, not a burst.
            self.countdown.tick(now_ms, &mut out);
            self.next_tick_ms = now_ms.saturating_add(self.interval_ms);
        }
        out
    }
}
