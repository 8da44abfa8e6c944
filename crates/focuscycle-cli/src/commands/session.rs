use std::error::Error;
use std::num::ParseIntError;
use std::time::Duration;

use focuscycle_core::{
    now_ms, worker_factory, Config, Confirmation, Database, Event, KvSnapshotStore,
    MemorySnapshotStore, Persistence, Phase, SessionError, SessionRuntime, SnapshotStore,
    StatusReport,
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const PUMP_INTERVAL: Duration = Duration::from_millis(250);

const HELP: &str = "commands: start [sets], toilet, resume, interrupt, return, violation, work, \
                    stop, end, restart, status, quit";

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Hook events go to stdout, one JSON object per line.
fn print_event(event: &Event) {
    print_json(event);
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "failed to serialize output"),
    }
}

fn shared_store() -> Result<KvSnapshotStore, Box<dyn Error>> {
    Ok(KvSnapshotStore::new(Database::open()?))
}

pub fn run(sets: u32) -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    let factory = worker_factory(config.watchdog.tick_interval_ms);
    let mut runtime = SessionRuntime::new(
        config,
        Box::new(shared_store()?),
        Box::new(print_event),
        Some(factory),
    );

    let outcome = runtime.open(now_ms());
    info!(?outcome, time_source = ?runtime.time_source_kind(), "session opened");
    if runtime.phase() == Phase::Idle {
        runtime.start_session(sets, now_ms())?;
    }
    eprintln!("{HELP}");

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(drive(&mut runtime))
}

/// Print the stored session as it would look after recovery.
///
/// Recovery runs against an in-memory copy so a live `run` in another
/// terminal never sees this process write to the shared store.
pub fn status() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    let scratch = MemorySnapshotStore::new();
    let shared = shared_store()?;
    if let Some(payload) = shared.read()? {
        scratch.write(&payload, "status:0")?;
    }

    let mut runtime =
        SessionRuntime::new(config, Box::new(scratch), Box::new(|_: &Event| {}), None);
    let now = now_ms();
    let outcome = runtime.open(now);
    info!(?outcome, "projected stored session");
    print_json(&runtime.status(now));
    Ok(())
}

pub fn reset() -> Result<(), Box<dyn Error>> {
    Persistence::new(Box::new(shared_store()?)).clear()?;
    println!("session reset");
    Ok(())
}

async fn drive(runtime: &mut SessionRuntime) -> Result<(), Box<dyn Error>> {
    let mut ticker = tokio::time::interval(PUMP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = ticker.tick() => runtime.pump(now_ms()),
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if handle_command(runtime, line.trim()) == Flow::Quit {
                    break;
                }
            }
        }
    }
    info!(phase = %runtime.phase(), "leaving; the session stays stored");
    Ok(())
}

fn handle_command(runtime: &mut SessionRuntime, line: &str) -> Flow {
    match execute(runtime, line, now_ms()) {
        Ok(Reply::Quit) => return Flow::Quit,
        Ok(Reply::Done) => {}
        Ok(Reply::Confirmation(confirmation)) => print_json(&confirmation),
        Ok(Reply::Status(status)) => print_json(&status),
        Ok(Reply::Unknown(command)) => eprintln!("unknown command: {command}\n{HELP}"),
        Err(e) => eprintln!("error: {e}"),
    }
    Flow::Continue
}

/// What a console line did, before anything is printed.
#[derive(Debug, PartialEq)]
enum Reply {
    Done,
    Confirmation(Confirmation),
    Status(StatusReport),
    Unknown(String),
    Quit,
}

fn execute(runtime: &mut SessionRuntime, line: &str, now: u64) -> Result<Reply, SessionError> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(Reply::Done);
    };

    let reply = match command {
        "start" => {
            let sets = parse_sets(words.next())?;
            runtime.start_session(sets, now)?;
            Reply::Done
        }
        "toilet" => {
            runtime.request_toilet_pause(now)?;
            Reply::Done
        }
        "resume" => {
            runtime.resume_from_toilet_pause(now)?;
            Reply::Done
        }
        "interrupt" => {
            runtime.request_external_interrupt(now)?;
            Reply::Done
        }
        "return" => {
            runtime.resolve_interrupt(now)?;
            Reply::Done
        }
        "work" => {
            runtime.resume_work(now)?;
            Reply::Done
        }
        "restart" => {
            runtime.restart(now)?;
            Reply::Done
        }
        "violation" => Reply::Confirmation(runtime.request_violation(now)?),
        "stop" => Reply::Confirmation(runtime.request_stop(now)?),
        "end" => Reply::Confirmation(runtime.request_end_session(now)?),
        "status" => Reply::Status(runtime.status(now)),
        "quit" | "exit" => Reply::Quit,
        other => Reply::Unknown(other.to_string()),
    };
    Ok(reply)
}

/// Optional set count; absent means unbounded.
fn parse_sets(arg: Option<&str>) -> Result<u32, SessionError> {
    let Some(raw) = arg else {
        return Ok(0);
    };
    raw.parse().map_err(|e: ParseIntError| SessionError::InvalidArgument {
        field: "sets".into(),
        message: e.to_string(),
    })
}
