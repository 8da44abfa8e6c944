mod confirm;
mod machine;
mod state;

pub use confirm::{ConfirmGate, Confirmation};
pub use machine::{Effect, GuardedAction, InterruptPlan, PhaseMachine};
pub use state::{remaining_secs_until, Phase, SessionState};
