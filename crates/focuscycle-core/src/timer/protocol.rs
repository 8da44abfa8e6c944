use serde::{Deserialize, Serialize};

use crate::error::TimeSourceError;

/// Commands sent to a time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum TimerCommand {
    /// Arm with a fresh deadline `now + duration_seconds`.
    Start { duration_seconds: u64 },
    /// Disarm. Never emits `complete`.
    Stop,
    /// Arm with an already-elapsed-adjusted remainder.
    Resume { remaining_seconds: u64 },
}

/// Events emitted by an armed time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum TimerEvent {
    Tick { remaining_seconds: u64 },
    /// Exactly once per arming, after which the source is disarmed.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSourceKind {
    /// Dedicated timing thread.
    Worker,
    /// Ticks computed on the caller's own pump.
    Interval,
}

/// A countdown driver the session runtime can swap at will.
///
/// Remaining time is always derived from an absolute deadline, never by
/// decrementing a counter, so late ticks cannot accumulate drift.
pub trait TimeSource {
    fn kind(&self) -> TimeSourceKind;

    /// Deliver a command. `now_ms` is the caller's clock; sources with their
    /// own clock may ignore it.
    fn send(&mut self, command: TimerCommand, now_ms: u64) -> Result<(), TimeSourceError>;

    /// Drain the events produced since the last poll, oldest first. Events
    /// from an arming that has since been replaced are never returned.
    fn poll(&mut self, now_ms: u64) -> Vec<TimerEvent>;
}

/// Deadline bookkeeping shared by the source implementations.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Countdown {
    deadline_ms: Option<u64>,
}

impl Countdown {
    pub(crate) fn apply(&mut self, command: TimerCommand, now_ms: u64) {
        self.deadline_ms = match command {
            TimerCommand::Start {
                duration_seconds: seconds,
            }
            | TimerCommand::Resume {
                remaining_seconds: seconds,
            } => Some(now_ms.saturating_add(seconds.saturating_mul(1000))),
            TimerCommand::Stop => None,
        };
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline_ms.is_some()
    }

    /// Emits the tick for `now_ms`, plus `Complete` (and disarms) at zero.
    pub(crate) fn tick(&mut self, now_ms: u64, out: &mut Vec<TimerEvent>) {
        let Some(deadline) = self.deadline_ms else {
            return;
        };
        let remaining_seconds = crate::session::remaining_secs_until(deadline, now_ms);
        out.push(TimerEvent::Tick { remaining_seconds });
        if remaining_seconds == 0 {
            self.deadline_ms = None;
            out.push(TimerEvent::Complete);
        }
    }
}
