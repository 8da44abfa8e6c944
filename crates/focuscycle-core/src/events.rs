use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Phase;

/// Hook points handed to the notification layer.
///
/// Raw ticks never appear here; consumers only learn about crossings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A session began. Hold any wake resource from here.
    SessionStarted {
        total_sets: u32,
        at: DateTime<Utc>,
    },
    /// The active phase crossed the one-minute-remaining mark.
    PreNotify {
        phase: Phase,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    PhaseCompleted {
        from: Phase,
        to: Phase,
        at: DateTime<Utc>,
    },
    /// Consolidated report after a catch-up replay.
    MissedCompletions {
        count: u32,
        phase: Phase,
        at: DateTime<Utc>,
    },
    /// All sets finished. Release any wake resource.
    SessionCompleted {
        current_set: u32,
        at: DateTime<Utc>,
    },
    /// The session was reset to idle before completing.
    SessionEnded {
        reason: EndReason,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Confirmed stop during work.
    Stopped,
    /// Confirmed session-end from a break, penalty or pause screen.
    Ended,
    /// Restart after completion.
    Restarted,
    /// Unobserved for longer than the abandonment ceiling.
    Abandoned,
    /// Another context took over the shared session.
    Superseded,
}

/// Converts epoch milliseconds into an event timestamp.
pub fn timestamp(at_ms: u64) -> DateTime<Utc> {
    i64::try_from(at_ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_default()
}
