mod interval;
mod protocol;
mod watchdog;
mod worker;

pub use interval::IntervalTimeSource;
pub use protocol::{TimeSource, TimeSourceKind, TimerCommand, TimerEvent};
pub use watchdog::{Watchdog, WatchdogVerdict};
pub use worker::WorkerTimeSource;
