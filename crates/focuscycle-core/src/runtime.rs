//! Session runtime.
//!
//! Glues the phase machine to the outside world: it owns the active time
//! source and its watchdog, writes snapshots, watches the shared store for
//! other contexts and forwards hook events to a [`NotifySink`]. The owner
//! calls [`SessionRuntime::pump`] on a short interval and forwards user
//! actions; everything runs on the owner's thread.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SessionError, TimeSourceError};
use crate::events::{EndReason, Event};
use crate::guard::ContextGuard;
use crate::recovery::{self, RecoveryOutcome};
use crate::session::{Confirmation, Effect, GuardedAction, InterruptPlan, Phase, PhaseMachine};
use crate::storage::{Config, Persistence, SnapshotStore};
use crate::timer::{
    IntervalTimeSource, TimeSource, TimeSourceKind, TimerCommand, TimerEvent, Watchdog,
    WatchdogVerdict, WorkerTimeSource,
};

/// Receives hook events.
pub trait NotifySink {
    fn notify(&mut self, event: &Event);
}

impl<F> NotifySink for F
where
    F: FnMut(&Event),
{
    fn notify(&mut self, event: &Event) {
        self(event)
    }
}

/// Creates a fresh primary time source; called again on every recycle.
pub type SourceFactory = Box<dyn FnMut() -> Result<Box<dyn TimeSource>, TimeSourceError>>;

/// Factory for the thread-backed source ticking every `tick_interval_ms`.
pub fn worker_factory(tick_interval_ms: u64) -> SourceFactory {
    let tick = Duration::from_millis(tick_interval_ms);
    Box::new(move || {
        WorkerTimeSource::spawn(tick).map(|source| Box::new(source) as Box<dyn TimeSource>)
    })
}

/// Point-in-time view of the session for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub phase: Phase,
    pub cycle: u32,
    pub cycles_per_set: u32,
    pub current_set: u32,
    /// 0 means unbounded.
    pub total_sets: u32,
    pub remaining_secs: Option<u64>,
    /// Remaining share of the current phase, 1.0 at its start.
    pub progress: f64,
    pub pre_notified: bool,
    pub saved_phase: Option<Phase>,
    pub interrupt_plan: Option<InterruptPlan>,
    pub time_source: TimeSourceKind,
}

pub struct SessionRuntime {
    config: Config,
    machine: PhaseMachine,
    source: Box<dyn TimeSource>,
    factory: Option<SourceFactory>,
    watchdog: Watchdog,
    persistence: Persistence,
    guard: ContextGuard,
    sink: Box<dyn NotifySink>,
    last_pump_ms: Option<u64>,
}

impl SessionRuntime {
    /// Build a runtime with an idle machine.
    ///
    /// `factory` creates the primary time source. Without one, or if it
    /// fails right away, the in-process fallback is used from the start.
    pub fn new(
        config: Config,
        store: Box<dyn SnapshotStore>,
        sink: Box<dyn NotifySink>,
        mut factory: Option<SourceFactory>,
    ) -> Self {
        let persistence = Persistence::new(store);
        let guard = ContextGuard::new(persistence.context_id(), persistence.current_stamp());
        let mut watchdog = Watchdog::new(config.watchdog);

        let primary = match factory.as_mut().map(|make| make()) {
            Some(Ok(source)) => Some(source),
            Some(Err(e)) => {
                warn!(error = %e, "primary time source unavailable, using fallback");
                None
            }
            None => None,
        };
        let source = match primary {
            Some(source) => source,
            None => {
                watchdog.give_up();
                Box::new(IntervalTimeSource::new(config.watchdog.fallback_interval_ms))
                    as Box<dyn TimeSource>
            }
        };

        Self {
            machine: PhaseMachine::new(config.timing, config.confirm.window_ms),
            config,
            source,
            factory,
            watchdog,
            persistence,
            guard,
            sink,
            last_pump_ms: None,
        }
    }

    /// Restore the persisted session, if any, and reconcile it with `now_ms`.
    pub fn open(&mut self, now_ms: u64) -> RecoveryOutcome {
        self.last_pump_ms = Some(now_ms);
        match self.persistence.load(self.config.timing.cycles_per_set) {
            Some(state) => {
                info!(
                    phase = %state.phase,
                    cycle = state.cycle,
                    set = state.current_set,
                    "restoring persisted session"
                );
                self.machine.restore(state);
                self.guard = ContextGuard::new(
                    self.persistence.context_id(),
                    self.persistence.current_stamp(),
                );
                self.recover(now_ms)
            }
            None => RecoveryOutcome::Idle,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn machine(&self) -> &PhaseMachine {
        &self.machine
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context_id(&self) -> Uuid {
        self.persistence.context_id()
    }

    pub fn time_source_kind(&self) -> TimeSourceKind {
        self.source.kind()
    }

    pub fn status(&self, now_ms: u64) -> StatusReport {
        let state = self.machine.state();
        StatusReport {
            phase: state.phase,
            cycle: state.cycle,
            cycles_per_set: self.config.timing.cycles_per_set,
            current_set: state.current_set,
            total_sets: state.total_sets,
            remaining_secs: self.machine.remaining_secs(now_ms),
            progress: self.machine.remaining_fraction(now_ms),
            pre_notified: state.pre_notified,
            saved_phase: state.saved_phase,
            interrupt_plan: self.machine.pending_interrupt_plan(),
            time_source: self.source.kind(),
        }
    }

    // ── User actions ─────────────────────────────────────────────────

    pub fn start_session(&mut self, total_sets: u32, now_ms: u64) -> Result<(), SessionError> {
        self.observe_shared_store(now_ms);
        let effects = self.machine.start_session(total_sets, now_ms)?;
        self.retry_primary();
        self.apply(effects, now_ms);
        Ok(())
    }

    pub fn request_toilet_pause(&mut self, now_ms: u64) -> Result<(), SessionError> {
        self.observe_shared_store(now_ms);
        let effects = self.machine.request_toilet_pause(now_ms)?;
        self.apply(effects, now_ms);
        Ok(())
    }

    pub fn resume_from_toilet_pause(&mut self, now_ms: u64) -> Result<(), SessionError> {
        self.observe_shared_store(now_ms);
        let effects = self.machine.resume_from_toilet_pause(now_ms)?;
        self.apply(effects, now_ms);
        Ok(())
    }

    pub fn request_external_interrupt(&mut self, now_ms: u64) -> Result<(), SessionError> {
        self.observe_shared_store(now_ms);
        let effects = self.machine.request_external_interrupt(now_ms)?;
        self.apply(effects, now_ms);
        Ok(())
    }

    pub fn resolve_interrupt(&mut self, now_ms: u64) -> Result<(), SessionError> {
        self.observe_shared_store(now_ms);
        let effects = self.machine.resolve_interrupt(now_ms)?;
        self.apply(effects, now_ms);
        Ok(())
    }

    pub fn resume_work(&mut self, now_ms: u64) -> Result<(), SessionError> {
        self.observe_shared_store(now_ms);
        let effects = self.machine.resume_work(now_ms)?;
        self.apply(effects, now_ms);
        Ok(())
    }

    pub fn restart(&mut self, now_ms: u64) -> Result<(), SessionError> {
        self.observe_shared_store(now_ms);
        let effects = self.machine.restart(now_ms)?;
        self.apply(effects, now_ms);
        Ok(())
    }

    pub fn request_violation(&mut self, now_ms: u64) -> Result<Confirmation, SessionError> {
        self.observe_shared_store(now_ms);
        let action = self.machine.request_violation(now_ms)?;
        Ok(self.apply_guarded(action, now_ms))
    }

    pub fn request_stop(&mut self, now_ms: u64) -> Result<Confirmation, SessionError> {
        self.observe_shared_store(now_ms);
        let action = self.machine.request_stop(now_ms)?;
        Ok(self.apply_guarded(action, now_ms))
    }

    pub fn request_end_session(&mut self, now_ms: u64) -> Result<Confirmation, SessionError> {
        self.observe_shared_store(now_ms);
        let action = self.machine.request_end_session(now_ms)?;
        Ok(self.apply_guarded(action, now_ms))
    }

    // ── Driving ──────────────────────────────────────────────────────

    /// Advance the runtime to `now_ms`.
    ///
    /// Checks the shared store, detects suspension gaps, drains the time
    /// source and runs the watchdog, in that order.
    pub fn pump(&mut self, now_ms: u64) {
        if self.observe_shared_store(now_ms) {
            self.last_pump_ms = Some(now_ms);
            return;
        }

        let previous = self.last_pump_ms.replace(now_ms);
        if let Some(previous) = previous {
            let gap_ms = now_ms.saturating_sub(previous);
            if gap_ms > self.config.recovery.suspend_gap_ms
                && self.machine.state().deadline.is_some()
            {
                info!(gap_ms, "pump resumed after a suspension gap, recovering");
                self.recover(now_ms);
            }
        }

        for event in self.source.poll(now_ms) {
            match event {
                TimerEvent::Tick { remaining_seconds } => {
                    self.watchdog.record_tick(now_ms);
                    let effects = self.machine.on_tick(remaining_seconds, now_ms);
                    self.apply(effects, now_ms);
                }
                TimerEvent::Complete => {
                    self.watchdog.on_disarmed();
                    let effects = self.machine.on_deadline_reached(now_ms);
                    self.apply(effects, now_ms);
                }
            }
        }

        match self.watchdog.check(now_ms, self.machine.state().deadline) {
            WatchdogVerdict::Healthy => {}
            WatchdogVerdict::Recycle { attempt, silent_ms } => {
                let stalled = TimeSourceError::Stalled { silent_ms };
                warn!(attempt, error = %stalled, "recycling time source");
                self.recycle(now_ms);
            }
            WatchdogVerdict::Fallback { silent_ms } => {
                warn!(silent_ms, "time source keeps stalling, switching to fallback for good");
                self.fall_back(now_ms);
            }
            WatchdogVerdict::Overdue { overdue_ms } => {
                warn!(overdue_ms, "deadline passed without completion, recovering");
                self.recover(now_ms);
            }
        }
    }

    /// The context became observable again (foreground, wake, restart).
    pub fn on_foreground(&mut self, now_ms: u64) -> RecoveryOutcome {
        self.last_pump_ms = Some(now_ms);
        if self.observe_shared_store(now_ms) {
            return RecoveryOutcome::Idle;
        }
        self.recover(now_ms)
    }

    /// Check the shared store for a write by another context.
    ///
    /// A foreign write while this context holds a session makes it give the
    /// session up without touching the store. Returns `true` if it did.
    pub fn observe_shared_store(&mut self, now_ms: u64) -> bool {
        let current = self.persistence.current_stamp();
        if !self.guard.observe(current.as_deref()) || self.machine.state().is_idle() {
            return false;
        }
        warn!(
            phase = %self.machine.phase(),
            stamp = current.as_deref().unwrap_or("<none>"),
            "session snapshot changed by another context, surrendering local session"
        );
        let effects = self.machine.discard(EndReason::Superseded, false, now_ms);
        self.apply(effects, now_ms);
        true
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn recover(&mut self, now_ms: u64) -> RecoveryOutcome {
        // Nothing may fire for the old arming while we recompute.
        self.send(TimerCommand::Stop, now_ms);
        self.watchdog.on_disarmed();
        let (outcome, effects) =
            recovery::reconcile(&mut self.machine, &self.config.recovery, now_ms);
        debug!(?outcome, "recovery finished");
        self.apply(effects, now_ms);
        outcome
    }

    fn apply_guarded(&mut self, action: GuardedAction, now_ms: u64) -> Confirmation {
        match action {
            GuardedAction::AwaitingConfirmation { expires_at_ms } => {
                Confirmation::Armed { expires_at_ms }
            }
            GuardedAction::Applied(effects) => {
                self.apply(effects, now_ms);
                Confirmation::Confirmed
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>, now_ms: u64) {
        for effect in effects {
            match effect {
                Effect::Arm { seconds } => {
                    self.send(
                        TimerCommand::Start {
                            duration_seconds: seconds,
                        },
                        now_ms,
                    );
                    self.watchdog.on_armed(now_ms);
                }
                Effect::Resume { seconds } => {
                    self.send(
                        TimerCommand::Resume {
                            remaining_seconds: seconds,
                        },
                        now_ms,
                    );
                    self.watchdog.on_armed(now_ms);
                }
                Effect::Disarm => {
                    self.send(TimerCommand::Stop, now_ms);
                    self.watchdog.on_disarmed();
                }
                Effect::Notify(event) => self.deliver(&event),
                Effect::Persist => match self.persistence.save(self.machine.state()) {
                    Ok(stamp) => self.guard.acknowledge(stamp),
                    Err(e) => warn!(error = %e, "failed to persist session snapshot"),
                },
                Effect::Erase => match self.persistence.clear() {
                    Ok(stamp) => self.guard.acknowledge(stamp),
                    Err(e) => warn!(error = %e, "failed to erase session snapshot"),
                },
            }
        }
    }

    fn deliver(&mut self, event: &Event) {
        let notifications = self.config.notifications;
        if !notifications.enabled {
            return;
        }
        if matches!(event, Event::PreNotify { .. }) && !notifications.pre_notify {
            return;
        }
        self.sink.notify(event);
    }

    fn send(&mut self, command: TimerCommand, now_ms: u64) {
        let Err(e) = self.source.send(command, now_ms) else {
            return;
        };
        warn!(error = %e, kind = ?self.source.kind(), "time source rejected a command");
        if self.source.kind() == TimeSourceKind::Interval {
            return;
        }
        self.install_fallback();
        if let Err(e) = self.source.send(command, now_ms) {
            warn!(error = %e, "fallback time source rejected a command");
        }
    }

    fn recycle(&mut self, now_ms: u64) {
        let created = match self.factory.as_mut() {
            Some(factory) => factory(),
            None => Err(TimeSourceError::Unavailable("no primary time source".into())),
        };
        match created {
            Ok(source) => {
                self.source = source;
                self.rearm(now_ms);
            }
            Err(e) => {
                warn!(error = %e, "could not recreate time source");
                self.fall_back(now_ms);
            }
        }
    }

    /// A fresh session gets another chance at the primary source.
    fn retry_primary(&mut self) {
        if !self.watchdog.has_given_up() {
            return;
        }
        let created = match self.factory.as_mut() {
            Some(factory) => factory(),
            None => return,
        };
        match created {
            Ok(source) => {
                info!("primary time source restored for the new session");
                self.source = source;
                self.watchdog.reset();
            }
            Err(e) => debug!(error = %e, "primary time source still unavailable"),
        }
    }

    fn fall_back(&mut self, now_ms: u64) {
        self.install_fallback();
        self.rearm(now_ms);
    }

    fn install_fallback(&mut self) {
        info!("switching to the in-process time source");
        self.watchdog.give_up();
        self.source = Box::new(IntervalTimeSource::new(
            self.config.watchdog.fallback_interval_ms,
        ));
    }

    /// Arm the current source with the remaining time of the active phase.
    fn rearm(&mut self, now_ms: u64) {
        if let Some(remaining_seconds) = self.machine.state().remaining_secs(now_ms) {
            self.send(TimerCommand::Resume { remaining_seconds }, now_ms);
            self.watchdog.on_armed(now_ms);
        }
    }
}
