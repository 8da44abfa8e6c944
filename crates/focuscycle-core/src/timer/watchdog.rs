//! Liveness supervision for the primary time source.
//!
//! The watchdog remembers when the last tick arrived. On each check
//! interval, if a deadline is armed and still ahead but the source has been
//! silent longer than the stale threshold, it asks for the worker to be
//! recycled. After `max_recycles` consecutive attempts it gives up on the
//! worker until [`Watchdog::reset`] is called for the next session.

use serde::{Deserialize, Serialize};

use crate::storage::WatchdogConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum WatchdogVerdict {
    Healthy,
    /// Terminate and recreate the worker, then re-arm it.
    Recycle { attempt: u32, silent_ms: u64 },
    /// Stop using the worker; switch to the in-process source for good.
    Fallback { silent_ms: u64 },
    /// The deadline passed without a completion arriving.
    Overdue { overdue_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    config: WatchdogConfig,
    last_tick_ms: Option<u64>,
    last_check_ms: Option<u64>,
    attempts: u32,
    gave_up: bool,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            last_tick_ms: None,
            last_check_ms: None,
            attempts: 0,
            gave_up: false,
        }
    }

    pub fn has_given_up(&self) -> bool {
        self.gave_up
    }

    #[cfg(test)]
    fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forget all history, including an earlier give-up.
    pub fn reset(&mut self) {
        self.last_tick_ms = None;
        self.last_check_ms = None;
        self.attempts = 0;
        self.gave_up = false;
    }

    /// A source was (re)armed; silence is measured from here.
    pub fn on_armed(&mut self, now_ms: u64) {
        self.last_tick_ms = Some(now_ms);
    }

    pub fn on_disarmed(&mut self) {
        self.last_tick_ms = None;
    }

    pub fn record_tick(&mut self, now_ms: u64) {
        self.last_tick_ms = Some(now_ms);
        self.attempts = 0;
    }

    /// Stop supervising the worker; the fallback is in charge now.
    pub fn give_up(&mut self) {
        self.gave_up = true;
    }

    pub fn check(&mut self, now_ms: u64, deadline_ms: Option<u64>) -> WatchdogVerdict {
        if let Some(last_check) = self.last_check_ms {
            if now_ms.saturating_sub(last_check) < self.config.check_interval_ms {
                return WatchdogVerdict::Healthy;
            }
        }
        self.last_check_ms = Some(now_ms);

        let (Some(deadline), Some(last_tick)) = (deadline_ms, self.last_tick_ms) else {
            return WatchdogVerdict::Healthy;
        };

        if now_ms >= deadline {
            let overdue_ms = now_ms - deadline;
            if overdue_ms > self.config.stale_after_ms {
                return WatchdogVerdict::Overdue { overdue_ms };
            }
            return WatchdogVerdict::Healthy;
        }

        if self.gave_up {
            return WatchdogVerdict::Healthy;
        }

        let silent_ms = now_ms.saturating_sub(last_tick);
        if silent_ms <= self.config.stale_after_ms {
            return WatchdogVerdict::Healthy;
        }

        if self.attempts < self.config.max_recycles {
            self.attempts += 1;
            // Fresh grace period for the replacement.
            self.last_tick_ms = Some(now_ms);
            WatchdogVerdict::Recycle {
                attempt: self.attempts,
                silent_ms,
            }
        } else {
            self.gave_up = true;
            WatchdogVerdict::Fallback { silent_ms }
        }
    }
}
