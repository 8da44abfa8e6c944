//! # Focuscycle Core Library
//!
//! Session engine for the Focuscycle work/break timer. The CLI in
//! `focuscycle-cli` is a thin shell over this crate.
//!
//! ## Architecture
//!
//! - **Session**: a reducer-style phase machine. Every operation takes the
//!   current time in epoch milliseconds and returns the effects to perform
//! - **Timer**: swappable countdown sources (a dedicated thread, or ticks
//!   computed on the caller's pump) plus a watchdog that recycles a stalled
//!   thread and eventually falls back
//! - **Recovery**: silent replay of the transitions missed while the
//!   process was suspended or not running
//! - **Storage**: TOML configuration and a SQLite key-value snapshot store
//!   shared between contexts
//! - **Guard**: detection of snapshots written by another context
//!
//! ## Key Components
//!
//! - [`PhaseMachine`]: phase state machine
//! - [`SessionRuntime`]: drives the machine from a time source
//! - [`Config`]: application configuration management
//! - [`Persistence`]: snapshot load/save/clear

pub mod error;
pub mod events;
pub mod guard;
pub mod recovery;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod timer;

pub use error::{
    ConfigError, CoreError, DatabaseError, SessionError, SnapshotError, TimeSourceError,
};
pub use events::{EndReason, Event};
pub use guard::ContextGuard;
pub use recovery::{reconcile, RecoveryOutcome};
pub use runtime::{worker_factory, NotifySink, SessionRuntime, SourceFactory, StatusReport};
pub use session::{
    Confirmation, Effect, GuardedAction, InterruptPlan, Phase, PhaseMachine, SessionState,
};
pub use storage::{
    Config, Database, KvSnapshotStore, MemorySnapshotStore, Persistence, SnapshotStore,
};
pub use timer::{
    IntervalTimeSource, TimeSource, TimeSourceKind, TimerCommand, TimerEvent, Watchdog,
    WatchdogVerdict, WorkerTimeSource,
};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
