//! Two-step confirmation for destructive actions.
//!
//! The first press arms the gate; a second press inside the window fires
//! the action. An armed gate that is not pressed again expires on its own.

use serde::{Deserialize, Serialize};

/// Outcome of pressing a [`ConfirmGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Confirmation {
    /// First press. Press again before `expires_at_ms` to confirm.
    Armed { expires_at_ms: u64 },
    /// Second press within the window.
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmGate {
    window_ms: u64,
    armed_at_ms: Option<u64>,
}

impl ConfirmGate {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            armed_at_ms: None,
        }
    }

    pub fn is_armed(&self, now_ms: u64) -> bool {
        self.armed_at_ms
            .is_some_and(|armed| now_ms.saturating_sub(armed) <= self.window_ms)
    }

    pub fn press(&mut self, now_ms: u64) -> Confirmation {
        if self.is_armed(now_ms) {
            self.armed_at_ms = None;
            Confirmation::Confirmed
        } else {
            self.armed_at_ms = Some(now_ms);
            Confirmation::Armed {
                expires_at_ms: now_ms.saturating_add(self.window_ms),
            }
        }
    }

    pub fn disarm(&mut self) {
        self.armed_at_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_press_within_window_confirms() {
        let mut gate = ConfirmGate::new(3_000);
        assert_eq!(
            gate.press(1_000),
            Confirmation::Armed {
                expires_at_ms: 4_000
            }
        );
        assert!(gate.is_armed(2_000));
        assert_eq!(gate.press(3_999), Confirmation::Confirmed);
        assert!(!gate.is_armed(4_000));
    }

    #[test]
    fn expired_arm_starts_over() {
        let mut gate = ConfirmGate::new(3_000);
        gate.press(0);
        assert!(!gate.is_armed(3_001));
        assert!(matches!(gate.press(3_001), Confirmation::Armed { .. }));
        assert_eq!(gate.press(3_500), Confirmation::Confirmed);
    }

    #[test]
    fn disarm_cancels() {
        let mut gate = ConfirmGate::new(3_000);
        gate.press(0);
        gate.disarm();
        assert!(matches!(gate.press(10), Confirmation::Armed { .. }));
    }
}
