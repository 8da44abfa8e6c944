//! Phase state machine.
//!
//! Owns the [`SessionState`] and is the only code that mutates it. Every
//! operation returns the list of [`Effect`]s the caller must carry out
//! (arm the time source, persist, notify). The machine itself never
//! touches a clock, a timer or storage: `now_ms` is always passed in.
//!
//! ## Transitions on deadline
//!
//! ```text
//! working (cycle < N)  -> short_break
//! working (cycle == N) -> long_break
//! short_break          -> working        cycle += 1
//! interrupt_break      -> working
//! long_break           -> working        set += 1, cycle = 1   (sets remain)
//! long_break           -> completed                            (last set)
//! banned               -> ready
//! ```
//!
//! While catching up, no effect is emitted at all and each new deadline is
//! chained from the previous one instead of from `now`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::confirm::{ConfirmGate, Confirmation};
use super::state::{Phase, SessionState};
use crate::error::SessionError;
use crate::events::{timestamp, EndReason, Event};
use crate::storage::TimingConfig;

/// Work the caller must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Arm the time source for a fresh phase.
    Arm { seconds: u64 },
    /// Arm the time source with an already-elapsed-adjusted remainder.
    Resume { seconds: u64 },
    Disarm,
    Notify(Event),
    /// Write the session snapshot.
    Persist,
    /// Remove the session snapshot.
    Erase,
}

/// Result of a two-step action.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardedAction {
    /// First press; nothing happened yet.
    AwaitingConfirmation { expires_at_ms: u64 },
    Applied(Vec<Effect>),
}

/// How an external interruption resolves when the user returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum InterruptPlan {
    /// Elapsed work already covers the whole phase.
    CountAsComplete,
    /// Start the work phase again from zero.
    Restart,
    /// Take a makeup break, then restart work.
    MakeupBreak { break_secs: u64 },
    /// Continue the work phase with the remaining time.
    Continue { remaining_secs: u64 },
}

impl InterruptPlan {
    pub fn for_elapsed(elapsed_secs: u64, timing: &TimingConfig) -> Self {
        if elapsed_secs >= timing.work_secs {
            InterruptPlan::CountAsComplete
        } else if elapsed_secs <= timing.interrupt_restart_secs {
            InterruptPlan::Restart
        } else if elapsed_secs <= timing.interrupt_makeup_secs {
            InterruptPlan::MakeupBreak {
                break_secs: timing.short_break_secs,
            }
        } else {
            InterruptPlan::Continue {
                remaining_secs: timing.work_secs - elapsed_secs,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhaseMachine {
    timing: TimingConfig,
    state: SessionState,
    catching_up: bool,
    stop_gate: ConfirmGate,
    violation_gate: ConfirmGate,
    end_gate: ConfirmGate,
}

impl PhaseMachine {
    pub fn new(timing: TimingConfig, confirm_window_ms: u64) -> Self {
        Self {
            timing,
            state: SessionState::idle(),
            catching_up: false,
            stop_gate: ConfirmGate::new(confirm_window_ms),
            violation_gate: ConfirmGate::new(confirm_window_ms),
            end_gate: ConfirmGate::new(confirm_window_ms),
        }
    }

    /// Adopt a previously persisted state. The caller validates it first.
    pub fn restore(&mut self, state: SessionState) {
        self.disarm_gates();
        self.catching_up = false;
        self.state = state;
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn is_catching_up(&self) -> bool {
        self.catching_up
    }

    /// Seconds left in the active phase, or the frozen remainder while paused.
    pub fn remaining_secs(&self, now_ms: u64) -> Option<u64> {
        match self.state.phase {
            Phase::Toilet => self.state.saved_remaining_seconds,
            _ => self.state.remaining_secs(now_ms),
        }
    }

    /// `remaining / duration` for the active phase, 0.0 when nothing runs.
    pub fn remaining_fraction(&self, now_ms: u64) -> f64 {
        let duration = self.state.current_phase_duration_seconds;
        match self.remaining_secs(now_ms) {
            Some(remaining) if duration > 0 => (remaining as f64 / duration as f64).min(1.0),
            _ => 0.0,
        }
    }

    /// What returning from the current interruption would do.
    pub fn pending_interrupt_plan(&self) -> Option<InterruptPlan> {
        self.state
            .work_elapsed_seconds
            .map(|elapsed| InterruptPlan::for_elapsed(elapsed, &self.timing))
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start_session(
        &mut self,
        total_sets: u32,
        now_ms: u64,
    ) -> Result<Vec<Effect>, SessionError> {
        self.require(&[Phase::Idle], "start")?;
        let mut effects = Vec::new();
        self.state = SessionState {
            total_sets,
            ..SessionState::idle()
        };
        self.emit(
            &mut effects,
            Effect::Notify(Event::SessionStarted {
                total_sets,
                at: timestamp(now_ms),
            }),
        );
        self.start_work(now_ms, &mut effects);
        Ok(effects)
    }

    /// A tick from the time source. Only the pre-notify crossing matters here.
    pub fn on_tick(&mut self, remaining_secs: u64, now_ms: u64) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.state.phase.is_counting() || self.state.pre_notified {
            return effects;
        }
        if remaining_secs <= self.timing.pre_notify_secs {
            self.state.pre_notified = true;
            self.emit(
                &mut effects,
                Effect::Notify(Event::PreNotify {
                    phase: self.state.phase,
                    remaining_secs,
                    at: timestamp(now_ms),
                }),
            );
            self.emit(&mut effects, Effect::Persist);
        }
        effects
    }

    /// The active phase reached its deadline. Advances exactly one phase.
    pub fn on_deadline_reached(&mut self, now_ms: u64) -> Vec<Effect> {
        let mut effects = Vec::new();
        let from = self.state.phase;
        // Replay chains deadlines so the reconstructed timeline matches real time.
        let base_ms = match (self.catching_up, self.state.deadline) {
            (true, Some(deadline)) => deadline,
            _ => now_ms,
        };

        match from {
            Phase::Working => {
                if self.state.cycle < self.timing.cycles_per_set {
                    let secs = self.timing.short_break_secs;
                    self.enter(Phase::ShortBreak, secs, base_ms, &mut effects);
                } else {
                    let secs = self.timing.long_break_secs;
                    self.enter(Phase::LongBreak, secs, base_ms, &mut effects);
                }
            }
            Phase::ShortBreak => {
                self.state.cycle = (self.state.cycle + 1).min(self.timing.cycles_per_set);
                self.start_work(base_ms, &mut effects);
            }
            Phase::InterruptBreak => self.start_work(base_ms, &mut effects),
            Phase::LongBreak => {
                let sets_remain =
                    self.state.total_sets == 0 || self.state.current_set < self.state.total_sets;
                if sets_remain {
                    self.state.current_set += 1;
                    self.state.cycle = 1;
                    self.start_work(base_ms, &mut effects);
                } else {
                    self.halt(Phase::Completed);
                    self.emit(
                        &mut effects,
                        Effect::Notify(Event::SessionCompleted {
                            current_set: self.state.current_set,
                            at: timestamp(now_ms),
                        }),
                    );
                    self.emit(&mut effects, Effect::Persist);
                }
            }
            Phase::Banned => {
                self.halt(Phase::Ready);
                self.emit(&mut effects, Effect::Persist);
            }
            Phase::Idle
            | Phase::Ready
            | Phase::Toilet
            | Phase::Interrupted
            | Phase::Completed => {
                debug!(phase = %from, "ignoring deadline for a phase that is not counting");
                return effects;
            }
        }

        debug!(
            from = %from,
            to = %self.state.phase,
            cycle = self.state.cycle,
            set = self.state.current_set,
            "phase advanced"
        );
        // Completion hook goes first so listeners see it before the next phase's hooks.
        if !self.catching_up {
            effects.insert(
                0,
                Effect::Notify(Event::PhaseCompleted {
                    from,
                    to: self.state.phase,
                    at: timestamp(now_ms),
                }),
            );
        }
        effects
    }

    /// Pause in place, keeping phase and remaining time.
    pub fn request_toilet_pause(&mut self, now_ms: u64) -> Result<Vec<Effect>, SessionError> {
        if !self.state.phase.is_pausable() {
            return Err(self.not_allowed("toilet"));
        }
        let mut effects = Vec::new();
        let saved_phase = self.state.phase;
        let remaining = self.state.remaining_secs(now_ms).unwrap_or(0);
        self.halt(Phase::Toilet);
        self.state.saved_phase = Some(saved_phase);
        self.state.saved_remaining_seconds = Some(remaining);
        self.emit(&mut effects, Effect::Disarm);
        self.emit(&mut effects, Effect::Persist);
        Ok(effects)
    }

    pub fn resume_from_toilet_pause(&mut self, now_ms: u64) -> Result<Vec<Effect>, SessionError> {
        self.require(&[Phase::Toilet], "resume")?;
        let (Some(phase), Some(remaining)) = (
            self.state.saved_phase.take(),
            self.state.saved_remaining_seconds.take(),
        ) else {
            return Err(self.not_allowed("resume"));
        };
        let mut effects = Vec::new();
        self.resume_with(phase, remaining, now_ms, &mut effects);
        Ok(effects)
    }

    pub fn request_external_interrupt(
        &mut self,
        now_ms: u64,
    ) -> Result<Vec<Effect>, SessionError> {
        self.require(&[Phase::Working], "interrupt")?;
        let mut effects = Vec::new();
        let remaining = self.state.remaining_secs(now_ms).unwrap_or(0);
        let elapsed = self.timing.work_secs.saturating_sub(remaining);
        self.halt(Phase::Interrupted);
        self.state.work_elapsed_seconds = Some(elapsed);
        self.emit(&mut effects, Effect::Disarm);
        self.emit(&mut effects, Effect::Persist);
        Ok(effects)
    }

    pub fn resolve_interrupt(&mut self, now_ms: u64) -> Result<Vec<Effect>, SessionError> {
        self.require(&[Phase::Interrupted], "return")?;
        let elapsed = self.state.work_elapsed_seconds.take().unwrap_or(0);
        let plan = InterruptPlan::for_elapsed(elapsed, &self.timing);
        debug!(elapsed, ?plan, "resolving interruption");
        let mut effects = Vec::new();
        match plan {
            InterruptPlan::CountAsComplete => {
                self.state.phase = Phase::Working;
                self.state.deadline = Some(now_ms);
                self.state.current_phase_duration_seconds = self.timing.work_secs;
                return Ok(self.on_deadline_reached(now_ms));
            }
            InterruptPlan::Restart => self.start_work(now_ms, &mut effects),
            InterruptPlan::MakeupBreak { break_secs } => {
                self.enter(Phase::InterruptBreak, break_secs, now_ms, &mut effects)
            }
            InterruptPlan::Continue { remaining_secs } => {
                self.state.current_phase_duration_seconds = self.timing.work_secs;
                self.resume_with(Phase::Working, remaining_secs, now_ms, &mut effects);
            }
        }
        Ok(effects)
    }

    /// Two-step: end the work phase and serve the penalty.
    pub fn request_violation(&mut self, now_ms: u64) -> Result<GuardedAction, SessionError> {
        self.require(&[Phase::Working], "violation")?;
        if let Confirmation::Armed { expires_at_ms } = self.violation_gate.press(now_ms) {
            return Ok(GuardedAction::AwaitingConfirmation { expires_at_ms });
        }
        let mut effects = Vec::new();
        self.emit(&mut effects, Effect::Disarm);
        self.enter(Phase::Banned, self.timing.ban_secs, now_ms, &mut effects);
        Ok(GuardedAction::Applied(effects))
    }

    /// Leave `ready` with a fresh work phase. Cycle is unchanged.
    pub fn resume_work(&mut self, now_ms: u64) -> Result<Vec<Effect>, SessionError> {
        self.require(&[Phase::Ready], "work")?;
        let mut effects = Vec::new();
        self.start_work(now_ms, &mut effects);
        Ok(effects)
    }

    /// Two-step stop, only while working.
    pub fn request_stop(&mut self, now_ms: u64) -> Result<GuardedAction, SessionError> {
        self.require(&[Phase::Working], "stop")?;
        if let Confirmation::Armed { expires_at_ms } = self.stop_gate.press(now_ms) {
            return Ok(GuardedAction::AwaitingConfirmation { expires_at_ms });
        }
        Ok(GuardedAction::Applied(self.reset(EndReason::Stopped, now_ms)))
    }

    /// Two-step session end from the non-abortable phases' screens.
    pub fn request_end_session(&mut self, now_ms: u64) -> Result<GuardedAction, SessionError> {
        self.require(
            &[
                Phase::ShortBreak,
                Phase::LongBreak,
                Phase::InterruptBreak,
                Phase::Banned,
                Phase::Ready,
                Phase::Toilet,
                Phase::Interrupted,
            ],
            "end",
        )?;
        if let Confirmation::Armed { expires_at_ms } = self.end_gate.press(now_ms) {
            return Ok(GuardedAction::AwaitingConfirmation { expires_at_ms });
        }
        Ok(GuardedAction::Applied(self.reset(EndReason::Ended, now_ms)))
    }

    pub fn restart(&mut self, now_ms: u64) -> Result<Vec<Effect>, SessionError> {
        self.require(&[Phase::Completed], "restart")?;
        Ok(self.reset(EndReason::Restarted, now_ms))
    }

    /// Reset to idle for a reason outside the user's control.
    ///
    /// `erase` is false when another context owns the stored snapshot.
    pub fn discard(&mut self, reason: EndReason, erase: bool, now_ms: u64) -> Vec<Effect> {
        let mut effects = self.reset(reason, now_ms);
        if !erase {
            effects.retain(|effect| *effect != Effect::Erase);
        }
        effects
    }

    // ── Internal ─────────────────────────────────────────────────────

    pub(crate) fn set_catching_up(&mut self, catching_up: bool) {
        self.catching_up = catching_up;
    }

    fn reset(&mut self, reason: EndReason, now_ms: u64) -> Vec<Effect> {
        debug!(phase = %self.state.phase, ?reason, "resetting session to idle");
        let mut effects = Vec::new();
        self.disarm_gates();
        self.state = SessionState::idle();
        self.emit(&mut effects, Effect::Disarm);
        self.emit(
            &mut effects,
            Effect::Notify(Event::SessionEnded {
                reason,
                at: timestamp(now_ms),
            }),
        );
        self.emit(&mut effects, Effect::Erase);
        effects
    }

    fn start_work(&mut self, base_ms: u64, effects: &mut Vec<Effect>) {
        self.enter(Phase::Working, self.timing.work_secs, base_ms, effects);
    }

    /// Activate a counting phase with its full nominal duration.
    fn enter(&mut self, phase: Phase, duration_secs: u64, base_ms: u64, effects: &mut Vec<Effect>) {
        self.disarm_gates();
        self.state.phase = phase;
        self.state.current_phase_duration_seconds = duration_secs;
        self.state.deadline = Some(base_ms.saturating_add(duration_secs.saturating_mul(1000)));
        self.state.pre_notified = false;
        self.state.saved_phase = None;
        self.state.saved_remaining_seconds = None;
        self.state.work_elapsed_seconds = None;
        self.emit(
            effects,
            Effect::Arm {
                seconds: duration_secs,
            },
        );
        self.emit(effects, Effect::Persist);
    }

    /// Re-activate a phase with a partial remainder, keeping its nominal duration.
    fn resume_with(
        &mut self,
        phase: Phase,
        remaining_secs: u64,
        now_ms: u64,
        effects: &mut Vec<Effect>,
    ) {
        self.disarm_gates();
        self.state.phase = phase;
        self.state.deadline = Some(now_ms.saturating_add(remaining_secs.saturating_mul(1000)));
        self.state.pre_notified = remaining_secs <= self.timing.pre_notify_secs;
        self.state.saved_phase = None;
        self.state.saved_remaining_seconds = None;
        self.state.work_elapsed_seconds = None;
        self.emit(
            effects,
            Effect::Resume {
                seconds: remaining_secs,
            },
        );
        self.emit(effects, Effect::Persist);
    }

    /// Move to a phase without a countdown.
    fn halt(&mut self, phase: Phase) {
        self.disarm_gates();
        self.state.phase = phase;
        self.state.deadline = None;
        self.state.pre_notified = false;
    }

    fn emit(&self, effects: &mut Vec<Effect>, effect: Effect) {
        if !self.catching_up {
            effects.push(effect);
        }
    }

    fn disarm_gates(&mut self) {
        self.stop_gate.disarm();
        self.violation_gate.disarm();
        self.end_gate.disarm();
    }

    fn require(&self, allowed: &[Phase], action: &'static str) -> Result<(), SessionError> {
        if allowed.contains(&self.state.phase) {
            Ok(())
        } else {
            Err(self.not_allowed(action))
        }
    }

    fn not_allowed(&self, action: &'static str) -> SessionError {
        SessionError::NotAllowed {
            action,
            phase: self.state.phase,
        }
    }
}
