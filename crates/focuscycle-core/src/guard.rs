//! Detection of session snapshots written by another context.
//!
//! Every snapshot write carries a `"<context-id>:<sequence>"` stamp. The
//! guard remembers the last stamp it saw; a change to a stamp that this
//! context did not write means someone else now owns the session.

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ContextGuard {
    own_prefix: String,
    last_seen: Option<String>,
}

impl ContextGuard {
    pub fn new(context_id: Uuid, initial_stamp: Option<String>) -> Self {
        Self {
            own_prefix: format!("{context_id}:"),
            last_seen: initial_stamp,
        }
    }

    /// Record a stamp this context just wrote.
    pub fn acknowledge(&mut self, stamp: String) {
        self.last_seen = Some(stamp);
    }

    /// Compare the store's current stamp with the last one seen.
    ///
    /// Returns `true` when the store changed and the change is not ours.
    pub fn observe(&mut self, current: Option<&str>) -> bool {
        if current == self.last_seen.as_deref() {
            return false;
        }
        let foreign = !current.is_some_and(|stamp| stamp.starts_with(&self.own_prefix));
        self.last_seen = current.map(str::to_owned);
        foreign
    }

    #[cfg(test)]
    fn last_seen(&self) -> Option<&str> {
        self.last_seen.as_deref()
    }
}
