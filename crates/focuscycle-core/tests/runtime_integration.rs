//! Time source supervision and multi-context behaviour of the runtime.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use focuscycle_core::{
    Config, EndReason, Event, MemorySnapshotStore, Persistence, Phase, SessionRuntime,
    SnapshotStore, SourceFactory, TimeSource, TimeSourceError, TimeSourceKind, TimerCommand,
    TimerEvent,
};

// ============================================================================
// Test doubles
// ============================================================================

/// A primary source that accepts commands and never emits anything.
struct SilentSource {
    commands: Rc<RefCell<Vec<TimerCommand>>>,
}

impl TimeSource for SilentSource {
    fn kind(&self) -> TimeSourceKind {
        TimeSourceKind::Worker
    }

    fn send(&mut self, command: TimerCommand, _now_ms: u64) -> Result<(), TimeSourceError> {
        self.commands.borrow_mut().push(command);
        Ok(())
    }

    fn poll(&mut self, _now_ms: u64) -> Vec<TimerEvent> {
        Vec::new()
    }
}

/// A primary source whose thread has gone away.
struct DeadSource;

impl TimeSource for DeadSource {
    fn kind(&self) -> TimeSourceKind {
        TimeSourceKind::Worker
    }

    fn send(&mut self, _command: TimerCommand, _now_ms: u64) -> Result<(), TimeSourceError> {
        Err(TimeSourceError::Unavailable("gone".into()))
    }

    fn poll(&mut self, _now_ms: u64) -> Vec<TimerEvent> {
        Vec::new()
    }
}

#[derive(Clone, Default)]
struct SourceLog {
    created: Rc<Cell<u32>>,
    commands: Rc<RefCell<Vec<TimerCommand>>>,
}

impl SourceLog {
    fn factory(&self) -> SourceFactory {
        let sources = self.clone();
        Box::new(move || {
            sources.created.set(sources.created.get() + 1);
            Ok(Box::new(SilentSource {
                commands: Rc::clone(&sources.commands),
            }) as Box<dyn TimeSource>)
        })
    }
}

type Log = Rc<RefCell<Vec<Event>>>;

fn runtime_on(store: &MemorySnapshotStore) -> (SessionRuntime, Log) {
    let log: Log = Rc::default();
    let sink_log = Rc::clone(&log);
    let runtime = SessionRuntime::new(
        Config::default(),
        Box::new(store.clone()),
        Box::new(move |event: &Event| sink_log.borrow_mut().push(event.clone())),
        None,
    );
    (runtime, log)
}

// ============================================================================
// Watchdog
// ============================================================================

#[test]
fn stalled_primary_is_recycled_then_replaced() {
    let sources = SourceLog::default();
    let mut runtime = SessionRuntime::new(
        Config::default(),
        Box::new(MemorySnapshotStore::new()),
        Box::new(|_: &Event| {}),
        Some(sources.factory()),
    );
    assert_eq!(sources.created.get(), 1);
    assert_eq!(runtime.time_source_kind(), TimeSourceKind::Worker);

    runtime.start_session(1, 0).unwrap();
    assert_eq!(
        sources.commands.borrow().as_slice(),
        &[TimerCommand::Start {
            duration_seconds: 1500
        }]
    );

    for now in (1_000..=7_000).step_by(1_000) {
        runtime.pump(now);
    }
    // First recycle at 7 s of silence re-arms the new source with the remainder.
    assert_eq!(sources.created.get(), 2);
    assert_eq!(
        sources.commands.borrow().last(),
        Some(&TimerCommand::Resume {
            remaining_seconds: 1493
        })
    );

    for now in (8_000..=30_000).step_by(1_000) {
        runtime.pump(now);
    }
    assert_eq!(sources.created.get(), 4);
    assert_eq!(runtime.time_source_kind(), TimeSourceKind::Interval);
    assert_eq!(runtime.phase(), Phase::Working);
    assert_eq!(runtime.status(30_000).remaining_secs, Some(1470));
}

#[test]
fn next_session_retries_the_primary_source() {
    let sources = SourceLog::default();
    let mut runtime = SessionRuntime::new(
        Config::default(),
        Box::new(MemorySnapshotStore::new()),
        Box::new(|_: &Event| {}),
        Some(sources.factory()),
    );
    runtime.start_session(1, 0).unwrap();
    for now in (1_000..=30_000).step_by(1_000) {
        runtime.pump(now);
    }
    assert_eq!(runtime.time_source_kind(), TimeSourceKind::Interval);

    runtime.request_stop(31_000).unwrap();
    runtime.request_stop(32_000).unwrap();
    assert_eq!(runtime.phase(), Phase::Idle);
    // Stopping alone does not bring the worker back.
    assert_eq!(runtime.time_source_kind(), TimeSourceKind::Interval);

    runtime.start_session(1, 40_000).unwrap();
    assert_eq!(sources.created.get(), 5);
    assert_eq!(runtime.time_source_kind(), TimeSourceKind::Worker);
    assert_eq!(
        sources.commands.borrow().last(),
        Some(&TimerCommand::Start {
            duration_seconds: 1500
        })
    );
}

#[test]
fn fallback_keeps_the_session_running() {
    let sources = SourceLog::default();
    let mut runtime = SessionRuntime::new(
        Config::default(),
        Box::new(MemorySnapshotStore::new()),
        Box::new(|_: &Event| {}),
        Some(sources.factory()),
    );
    runtime.start_session(1, 0).unwrap();
    let mut now = 0;
    while now < 1_600_000 {
        now += 1_000;
        runtime.pump(now);
    }
    assert_eq!(runtime.time_source_kind(), TimeSourceKind::Interval);
    assert_eq!(runtime.phase(), Phase::ShortBreak);
}

#[test]
fn rejected_command_switches_to_fallback() {
    let factory: SourceFactory = Box::new(|| Ok(Box::new(DeadSource) as Box<dyn TimeSource>));
    let mut runtime = SessionRuntime::new(
        Config::default(),
        Box::new(MemorySnapshotStore::new()),
        Box::new(|_: &Event| {}),
        Some(factory),
    );
    runtime.start_session(1, 0).unwrap();
    assert_eq!(runtime.time_source_kind(), TimeSourceKind::Interval);
    runtime.pump(1_000);
    assert_eq!(runtime.status(1_000).remaining_secs, Some(1499));
}

// ============================================================================
// Multi-context guard
// ============================================================================

#[test]
fn foreign_write_makes_local_session_surrender() {
    let store = MemorySnapshotStore::new();
    let (mut first, first_log) = runtime_on(&store);
    first.start_session(1, 0).unwrap();

    let (mut second, _) = runtime_on(&store);
    second.open(10_000);
    assert_eq!(second.phase(), Phase::Working);
    second.request_toilet_pause(20_000).unwrap();
    let snapshot_before = store.read().unwrap();

    first.pump(21_000);

    assert_eq!(first.phase(), Phase::Idle);
    assert!(matches!(
        first_log.borrow().last(),
        Some(Event::SessionEnded { reason: EndReason::Superseded, .. })
    ));
    // The surrendering context leaves the other context's snapshot alone.
    assert_eq!(store.read().unwrap(), snapshot_before);
    assert_eq!(second.phase(), Phase::Toilet);
}

#[test]
fn own_writes_never_trigger_surrender() {
    let store = MemorySnapshotStore::new();
    let (mut runtime, _) = runtime_on(&store);
    runtime.start_session(1, 0).unwrap();
    runtime.request_toilet_pause(1_000).unwrap();
    runtime.resume_from_toilet_pause(2_000).unwrap();
    for now in (3_000..10_000).step_by(1_000) {
        runtime.pump(now);
    }
    assert_eq!(runtime.phase(), Phase::Working);
}

#[test]
fn external_reset_stops_running_session() {
    let store = MemorySnapshotStore::new();
    let (mut runtime, _) = runtime_on(&store);
    runtime.start_session(1, 0).unwrap();

    Persistence::new(Box::new(store.clone())).clear().unwrap();

    assert!(runtime.observe_shared_store(5_000));
    assert_eq!(runtime.phase(), Phase::Idle);
    assert!(runtime.request_toilet_pause(6_000).is_err());
}

#[test]
fn idle_context_ignores_foreign_writes() {
    let store = MemorySnapshotStore::new();
    let (mut idle, log) = runtime_on(&store);
    let (mut active, _) = runtime_on(&store);
    active.start_session(1, 0).unwrap();

    assert!(!idle.observe_shared_store(1_000));
    assert!(log.borrow().is_empty());
    assert!(store.read().unwrap().is_some());
}
