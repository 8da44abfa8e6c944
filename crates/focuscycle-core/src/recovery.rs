//! Reconciling a session with the clock after an observation gap.
//!
//! While the process was suspended (or simply not running) deadlines kept
//! passing. [`reconcile`] replays the missed transitions silently, chaining
//! each deadline from the previous one, and hands back the effects needed to
//! continue from the reconstructed state: one re-arm, one snapshot write and
//! at most one consolidated notification, followed by `SessionCompleted`
//! when the replay ran off the end of the last set.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::events::{timestamp, EndReason, Event};
use crate::session::{remaining_secs_until, Effect, Phase, PhaseMachine};
use crate::storage::RecoveryConfig;

/// What recovery found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// No session.
    Idle,
    /// Session exists but nothing is counting down.
    Waiting { phase: Phase },
    /// The deadline has not passed yet.
    OnTime { remaining_secs: u64 },
    /// One or more phases completed while unobserved.
    CaughtUp { advanced: u32, phase: Phase },
    /// Unobserved for longer than the abandonment ceiling; reset to idle.
    Abandoned { missed_secs: u64 },
    /// Replay hit the iteration cap with a deadline still in the past.
    Runaway { advanced: u32, phase: Phase },
}

/// Bring `machine` up to date with `now_ms`.
///
/// The caller must have disarmed its time source already; the returned
/// effects re-arm it if a phase is still counting.
pub fn reconcile(
    machine: &mut PhaseMachine,
    config: &RecoveryConfig,
    now_ms: u64,
) -> (RecoveryOutcome, Vec<Effect>) {
    let Some(deadline) = machine.state().deadline else {
        let outcome = match machine.phase() {
            Phase::Idle => RecoveryOutcome::Idle,
            phase => RecoveryOutcome::Waiting { phase },
        };
        return (outcome, Vec::new());
    };

    if now_ms <= deadline {
        let remaining_secs = remaining_secs_until(deadline, now_ms);
        return (
            RecoveryOutcome::OnTime { remaining_secs },
            vec![Effect::Resume {
                seconds: remaining_secs,
            }],
        );
    }

    let missed_ms = now_ms - deadline;
    if missed_ms > config.abandon_after_secs.saturating_mul(1000) {
        let missed_secs = missed_ms / 1000;
        info!(missed_secs, phase = %machine.phase(), "session unobserved for too long, discarding");
        let effects = machine.discard(EndReason::Abandoned, true, now_ms);
        return (RecoveryOutcome::Abandoned { missed_secs }, effects);
    }

    machine.set_catching_up(true);
    let mut advanced = 0u32;
    while advanced < config.max_catchup_steps && is_due(machine, now_ms) {
        machine.on_deadline_reached(now_ms);
        advanced += 1;
    }
    machine.set_catching_up(false);

    let phase = machine.phase();
    let outcome = if is_due(machine, now_ms) {
        error!(advanced, phase = %phase, "catch-up replay hit its iteration cap");
        RecoveryOutcome::Runaway { advanced, phase }
    } else {
        info!(advanced, phase = %phase, "caught up with missed phases");
        RecoveryOutcome::CaughtUp { advanced, phase }
    };

    let mut effects = Vec::new();
    if let Some(deadline) = machine.state().deadline {
        effects.push(Effect::Resume {
            seconds: remaining_secs_until(deadline, now_ms),
        });
    }
    effects.push(Effect::Persist);
    if advanced > 0 {
        effects.push(Effect::Notify(Event::MissedCompletions {
            count: advanced,
            phase,
            at: timestamp(now_ms),
        }));
        // Replay suppressed the terminal hook; it still fires once here.
        if phase == Phase::Completed {
            effects.push(Effect::Notify(Event::SessionCompleted {
                current_set: machine.state().current_set,
                at: timestamp(now_ms),
            }));
        }
    }
    (outcome, effects)
}

fn is_due(machine: &PhaseMachine, now_ms: u64) -> bool {
    machine
        .state()
        .deadline
        .is_some_and(|deadline| deadline <= now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TimingConfig;

    const W: u64 = 1_500_000;

    fn session(total_sets: u32) -> PhaseMachine {
        let mut machine = PhaseMachine::new(TimingConfig::default(), 3_000);
        machine.start_session(total_sets, 0).unwrap();
        machine
    }

    fn notifications(effects: &[Effect]) -> Vec<&Event> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Notify(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn nothing_to_do_when_idle() {
        let mut machine = PhaseMachine::new(TimingConfig::default(), 3_000);
        let (outcome, effects) = reconcile(&mut machine, &RecoveryConfig::default(), 10);
        assert_eq!(outcome, RecoveryOutcome::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn paused_session_waits() {
        let mut machine = session(1);
        machine.request_toilet_pause(1_000).unwrap();
        let (outcome, effects) = reconcile(&mut machine, &RecoveryConfig::default(), 10 * W);
        assert_eq!(
            outcome,
            RecoveryOutcome::Waiting {
                phase: Phase::Toilet
            }
        );
        assert!(effects.is_empty());
    }

    #[test]
    fn false_wake_rearms_same_phase() {
        let mut machine = session(1);
        let (outcome, effects) = reconcile(&mut machine, &RecoveryConfig::default(), 1_000);
        assert_eq!(
            outcome,
            RecoveryOutcome::OnTime {
                remaining_secs: 1499
            }
        );
        assert_eq!(effects, vec![Effect::Resume { seconds: 1499 }]);
        assert_eq!(machine.phase(), Phase::Working);
    }

    #[test]
    fn one_missed_completion() {
        let mut machine = session(1);
        let (outcome, effects) = reconcile(&mut machine, &RecoveryConfig::default(), W + 500);
        assert_eq!(
            outcome,
            RecoveryOutcome::CaughtUp {
                advanced: 1,
                phase: Phase::ShortBreak
            }
        );
        assert_eq!(machine.state().deadline, Some(W + 330_000));
        assert_eq!(effects[0], Effect::Resume { seconds: 330 });
        assert_eq!(effects[1], Effect::Persist);
        assert!(matches!(
            notifications(&effects)[..],
            [Event::MissedCompletions { count: 1, phase: Phase::ShortBreak, .. }]
        ));
        assert!(!machine.is_catching_up());
    }

    #[test]
    fn replay_stops_at_ready() {
        let mut machine = session(1);
        machine.request_violation(0).unwrap();
        machine.request_violation(1).unwrap();
        let (outcome, effects) = reconcile(&mut machine, &RecoveryConfig::default(), 3_600_000);
        assert_eq!(
            outcome,
            RecoveryOutcome::CaughtUp {
                advanced: 1,
                phase: Phase::Ready
            }
        );
        assert!(!effects.iter().any(|e| matches!(e, Effect::Resume { .. })));
        assert!(effects.contains(&Effect::Persist));
    }

    #[test]
    fn replay_into_completion_still_releases() {
        let mut machine = session(1);
        let (outcome, effects) = reconcile(&mut machine, &RecoveryConfig::default(), 10_000_000);
        assert_eq!(
            outcome,
            RecoveryOutcome::CaughtUp {
                advanced: 8,
                phase: Phase::Completed
            }
        );
        assert!(matches!(
            notifications(&effects)[..],
            [
                Event::MissedCompletions { count: 8, phase: Phase::Completed, .. },
                Event::SessionCompleted { current_set: 1, .. },
            ]
        ));
    }

    #[test]
    fn abandonment_ceiling_is_inclusive() {
        let config = RecoveryConfig::default();
        let ceiling = config.abandon_after_secs * 1000;

        let mut machine = session(0);
        let (outcome, _) = reconcile(&mut machine, &config, W + ceiling);
        assert!(matches!(outcome, RecoveryOutcome::CaughtUp { .. }));

        let mut machine = session(0);
        let (outcome, effects) = reconcile(&mut machine, &config, W + ceiling + 1);
        assert_eq!(
            outcome,
            RecoveryOutcome::Abandoned {
                missed_secs: 14_400
            }
        );
        assert!(machine.state().is_idle());
        assert!(effects.contains(&Effect::Erase));
        assert!(matches!(
            notifications(&effects)[..],
            [Event::SessionEnded { reason: EndReason::Abandoned, .. }]
        ));
    }

    #[test]
    fn iteration_cap_is_a_fuse() {
        let config = RecoveryConfig {
            max_catchup_steps: 2,
            ..RecoveryConfig::default()
        };
        let mut machine = session(0);
        let (outcome, effects) = reconcile(&mut machine, &config, 3 * W);
        assert_eq!(
            outcome,
            RecoveryOutcome::Runaway {
                advanced: 2,
                phase: Phase::Working
            }
        );
        assert_eq!(machine.state().cycle, 2);
        assert!(effects.contains(&Effect::Resume { seconds: 0 }));
        assert!(!machine.is_catching_up());
    }
}
