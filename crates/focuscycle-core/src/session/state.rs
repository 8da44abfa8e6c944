use std::fmt;

use serde::{Deserialize, Serialize};

/// One interval of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Working,
    ShortBreak,
    LongBreak,
    /// Makeup break inserted after a mid-length external interruption.
    InterruptBreak,
    /// Penalty phase after a self-reported violation.
    Banned,
    /// Penalty served; waits for an explicit resume.
    Ready,
    /// Pause-in-place.
    Toilet,
    /// Work halted by an external interruption, waiting for the user to return.
    Interrupted,
    Completed,
}

impl Phase {
    pub const ALL: [Phase; 10] = [
        Phase::Idle,
        Phase::Working,
        Phase::ShortBreak,
        Phase::LongBreak,
        Phase::InterruptBreak,
        Phase::Banned,
        Phase::Ready,
        Phase::Toilet,
        Phase::Interrupted,
        Phase::Completed,
    ];

    /// Phases that count down towards a deadline.
    pub fn is_counting(self) -> bool {
        matches!(
            self,
            Phase::Working
                | Phase::ShortBreak
                | Phase::LongBreak
                | Phase::InterruptBreak
                | Phase::Banned
        )
    }

    /// Phases that can be paused in place.
    pub fn is_pausable(self) -> bool {
        self.is_counting() && self != Phase::Banned
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Working => "working",
            Phase::ShortBreak => "short_break",
            Phase::LongBreak => "long_break",
            Phase::InterruptBreak => "interrupt_break",
            Phase::Banned => "banned",
            Phase::Ready => "ready",
            Phase::Toilet => "toilet",
            Phase::Interrupted => "interrupted",
            Phase::Completed => "completed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted session record.
///
/// Mutated only by [`super::PhaseMachine`]. Serialized flat, one field per
/// column of the snapshot schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: Phase,
    pub cycle: u32,
    pub current_set: u32,
    /// `0` runs sets until stopped.
    pub total_sets: u32,
    /// Epoch milliseconds at which the active phase ends.
    #[serde(default)]
    pub deadline: Option<u64>,
    #[serde(default)]
    pub pre_notified: bool,
    #[serde(default)]
    pub saved_phase: Option<Phase>,
    #[serde(default)]
    pub saved_remaining_seconds: Option<u64>,
    #[serde(default)]
    pub work_elapsed_seconds: Option<u64>,
    #[serde(default)]
    pub current_phase_duration_seconds: u64,
}

impl SessionState {
    pub fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            cycle: 1,
            current_set: 1,
            total_sets: 0,
            deadline: None,
            pre_notified: false,
            saved_phase: None,
            saved_remaining_seconds: None,
            work_elapsed_seconds: None,
            current_phase_duration_seconds: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Whole seconds until the deadline, rounded up. `None` when nothing counts down.
    pub fn remaining_secs(&self, now_ms: u64) -> Option<u64> {
        self.deadline.map(|deadline| remaining_secs_until(deadline, now_ms))
    }

    /// Checks the record invariants. Used to reject persisted snapshots.
    pub fn validate(&self, cycles_per_set: u32) -> Result<(), String> {
        if self.cycle == 0 || self.cycle > cycles_per_set {
            return Err(format!(
                "cycle {} outside 1..={cycles_per_set}",
                self.cycle
            ));
        }
        if self.current_set == 0 {
            return Err("current_set must be at least 1".into());
        }
        if self.total_sets != 0 && self.current_set > self.total_sets {
            return Err(format!(
                "current_set {} exceeds total_sets {}",
                self.current_set, self.total_sets
            ));
        }
        if self.deadline.is_some() != self.phase.is_counting() {
            return Err(format!(
                "deadline {:?} does not match phase {}",
                self.deadline, self.phase
            ));
        }
        if self.saved_phase.is_some() && self.work_elapsed_seconds.is_some() {
            return Err("pause and interruption sub-states are both set".into());
        }
        if (self.phase == Phase::Toilet)
            != (self.saved_phase.is_some() && self.saved_remaining_seconds.is_some())
        {
            return Err("pause snapshot does not match phase".into());
        }
        if let Some(saved) = self.saved_phase {
            if !saved.is_pausable() {
                return Err(format!("cannot resume into {saved}"));
            }
        }
        if (self.phase == Phase::Interrupted) != self.work_elapsed_seconds.is_some() {
            return Err("interruption record does not match phase".into());
        }
        Ok(())
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::idle()
    }
}

/// `ceil((deadline - now) / 1000)`, clamped at zero.
pub fn remaining_secs_until(deadline_ms: u64, now_ms: u64) -> u64 {
    deadline_ms.saturating_sub(now_ms).div_ceil(1000)
}
