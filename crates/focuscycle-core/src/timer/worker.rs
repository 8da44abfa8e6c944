//! Thread-backed time source.
//!
//! The countdown runs on its own OS thread and talks to the owner only
//! through channels, so a busy or throttled owner cannot delay the ticks
//! themselves. Each command carries a generation number; events are
//! stamped with the generation of the arming that produced them and the
//! owner drops any event from an older generation.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::protocol::{Countdown, TimeSource, TimeSourceKind, TimerCommand, TimerEvent};
use crate::error::TimeSourceError;
use crate::now_ms;

struct Stamped<T> {
    generation: u64,
    body: T,
}

pub struct WorkerTimeSource {
    commands: Sender<Stamped<TimerCommand>>,
    events: Receiver<Stamped<TimerEvent>>,
    generation: u64,
}

impl WorkerTimeSource {
    /// Spawn the timing thread.
    ///
    /// # Errors
    /// Returns [`TimeSourceError::Unavailable`] if the thread cannot be created.
    pub fn spawn(tick_interval: Duration) -> Result<Self, TimeSourceError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        thread::Builder::new()
            .name("focuscycle-timer".into())
            .spawn(move || run(command_rx, event_tx, tick_interval))
            .map_err(|e| TimeSourceError::Unavailable(e.to_string()))?;
        Ok(Self {
            commands: command_tx,
            events: event_rx,
            generation: 0,
        })
    }
}

impl TimeSource for WorkerTimeSource {
    fn kind(&self) -> TimeSourceKind {
        TimeSourceKind::Worker
    }

    fn send(&mut self, command: TimerCommand, _now_ms: u64) -> Result<(), TimeSourceError> {
        self.generation += 1;
        self.commands
            .send(Stamped {
                generation: self.generation,
                body: command,
            })
            .map_err(|_| TimeSourceError::Unavailable("timing thread has exited".into()))
    }

    fn poll(&mut self, _now_ms: u64) -> Vec<TimerEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) if event.generation == self.generation => out.push(event.body),
                Ok(_) => {}
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

// Dropping the source drops the command sender, which ends the thread on its
// next wake-up. A hung thread is simply left behind.

fn run(
    commands: Receiver<Stamped<TimerCommand>>,
    events: Sender<Stamped<TimerEvent>>,
    tick: Duration,
) {
    let mut countdown = Countdown::default();
    let mut generation = 0;
    let mut batch = Vec::new();

    loop {
        let received = if countdown.is_armed() {
            match commands.recv_timeout(tick) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        if let Some(command) = received {
            generation = command.generation;
            countdown.apply(command.body, now_ms());
            continue;
        }

        countdown.tick(now_ms(), &mut batch);
        for body in batch.drain(..) {
            if events.send(Stamped { generation, body }).is_err() {
                debug!("timer owner went away, stopping thread");
                return;
            }
        }
    }
    debug!("timer command channel closed, stopping thread");
}
