//! Session snapshot persistence.
//!
//! The storage contract is deliberately small: read, write, erase and a
//! writer stamp. Every write (including an erase) replaces the stamp with
//! `"<context-id>:<sequence>"`, which is how a context tells its own writes
//! apart from another context's.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use super::database::Database;
use crate::error::{CoreError, SnapshotError};
use crate::session::SessionState;

const SNAPSHOT_KEY: &str = "session_state";
const STAMP_KEY: &str = "session_stamp";

/// Minimal shared key-value contract for the session snapshot.
pub trait SnapshotStore {
    fn read(&self) -> Result<Option<String>, CoreError>;
    fn write(&self, payload: &str, stamp: &str) -> Result<(), CoreError>;
    /// Remove the payload, leaving `stamp` behind as a tombstone.
    fn erase(&self, stamp: &str) -> Result<(), CoreError>;
    fn stamp(&self) -> Result<Option<String>, CoreError>;
}

/// Snapshot store over the SQLite `kv` table.
pub struct KvSnapshotStore {
    db: Database,
}

impl KvSnapshotStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl SnapshotStore for KvSnapshotStore {
    fn read(&self) -> Result<Option<String>, CoreError> {
        Ok(self.db.kv_get(SNAPSHOT_KEY)?)
    }

    fn write(&self, payload: &str, stamp: &str) -> Result<(), CoreError> {
        self.db
            .kv_apply(&[(SNAPSHOT_KEY, Some(payload)), (STAMP_KEY, Some(stamp))])?;
        Ok(())
    }

    fn erase(&self, stamp: &str) -> Result<(), CoreError> {
        self.db
            .kv_apply(&[(SNAPSHOT_KEY, None), (STAMP_KEY, Some(stamp))])?;
        Ok(())
    }

    fn stamp(&self) -> Result<Option<String>, CoreError> {
        Ok(self.db.kv_get(STAMP_KEY)?)
    }
}

#[derive(Debug, Default)]
struct MemorySlot {
    payload: Option<String>,
    stamp: Option<String>,
}

/// In-memory store. Clones share the same slot, which models two contexts
/// looking at one store.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    slot: Arc<Mutex<MemorySlot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slot<T>(&self, f: impl FnOnce(&mut MemorySlot) -> T) -> Result<T, CoreError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| CoreError::Custom("snapshot store lock poisoned".into()))?;
        Ok(f(&mut slot))
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read(&self) -> Result<Option<String>, CoreError> {
        self.with_slot(|slot| slot.payload.clone())
    }

    fn write(&self, payload: &str, stamp: &str) -> Result<(), CoreError> {
        self.with_slot(|slot| {
            slot.payload = Some(payload.to_string());
            slot.stamp = Some(stamp.to_string());
        })
    }

    fn erase(&self, stamp: &str) -> Result<(), CoreError> {
        self.with_slot(|slot| {
            slot.payload = None;
            slot.stamp = Some(stamp.to_string());
        })
    }

    fn stamp(&self) -> Result<Option<String>, CoreError> {
        self.with_slot(|slot| slot.stamp.clone())
    }
}

/// Reads and writes [`SessionState`] snapshots for one context.
pub struct Persistence {
    store: Box<dyn SnapshotStore>,
    context_id: Uuid,
    sequence: u64,
}

impl Persistence {
    pub fn new(store: Box<dyn SnapshotStore>) -> Self {
        Self {
            store,
            context_id: Uuid::new_v4(),
            sequence: 0,
        }
    }

    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    /// Load the stored session.
    ///
    /// Absent, unreadable, unparsable and inconsistent snapshots all come
    /// back as `None`; the broken ones are erased on the way.
    pub fn load(&mut self, cycles_per_set: u32) -> Option<SessionState> {
        let payload = match self.store.read() {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read session snapshot, starting idle");
                return None;
            }
        };
        match decode(&payload, cycles_per_set) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "discarding corrupt session snapshot");
                if let Err(e) = self.clear() {
                    warn!(error = %e, "failed to erase corrupt session snapshot");
                }
                None
            }
        }
    }

    /// Write the snapshot and return the stamp that was written.
    pub fn save(&mut self, state: &SessionState) -> Result<String, CoreError> {
        let payload = serde_json::to_string(state)?;
        let stamp = self.next_stamp();
        self.store.write(&payload, &stamp)?;
        debug!(phase = %state.phase, %stamp, "session snapshot saved");
        Ok(stamp)
    }

    /// Erase the snapshot and return the tombstone stamp.
    pub fn clear(&mut self) -> Result<String, CoreError> {
        let stamp = self.next_stamp();
        self.store.erase(&stamp)?;
        debug!(%stamp, "session snapshot erased");
        Ok(stamp)
    }

    /// The stamp currently in the shared store. Read errors count as "unknown".
    pub fn current_stamp(&self) -> Option<String> {
        match self.store.stamp() {
            Ok(stamp) => stamp,
            Err(e) => {
                warn!(error = %e, "failed to read snapshot stamp");
                None
            }
        }
    }

    fn next_stamp(&mut self) -> String {
        self.sequence += 1;
        format!("{}:{}", self.context_id, self.sequence)
    }
}

fn decode(payload: &str, cycles_per_set: u32) -> Result<SessionState, SnapshotError> {
    let state: SessionState = serde_json::from_str(payload)?;
    state
        .validate(cycles_per_set)
        .map_err(SnapshotError::Invalid)?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Phase;

    fn working_state() -> SessionState {
        SessionState {
            phase: Phase::Working,
            total_sets: 2,
            deadline: Some(1_500_000),
            current_phase_duration_seconds: 1500,
            ..SessionState::idle()
        }
    }

    #[test]
    fn save_then_load_returns_same_state() {
        let store = MemorySnapshotStore::new();
        let mut persistence = Persistence::new(Box::new(store.clone()));
        persistence.save(&working_state()).unwrap();
        assert_eq!(persistence.load(4), Some(working_state()));
    }

    #[test]
    fn snapshot_is_flat_snake_case() {
        let store = MemorySnapshotStore::new();
        let mut persistence = Persistence::new(Box::new(store.clone()));
        persistence.save(&working_state()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&store.read().unwrap().unwrap()).unwrap();
        for key in [
            "phase",
            "cycle",
            "current_set",
            "total_sets",
            "deadline",
            "pre_notified",
            "saved_phase",
            "saved_remaining_seconds",
            "work_elapsed_seconds",
            "current_phase_duration_seconds",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json.get("catching_up").is_none());
    }

    #[test]
    fn absent_snapshot_loads_as_none() {
        let mut persistence = Persistence::new(Box::new(MemorySnapshotStore::new()));
        assert_eq!(persistence.load(4), None);
    }

    #[test]
    fn corrupt_snapshot_is_discarded() {
        let store = MemorySnapshotStore::new();
        store.write("{not json", "other:1").unwrap();
        let mut persistence = Persistence::new(Box::new(store.clone()));
        assert_eq!(persistence.load(4), None);
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn inconsistent_snapshot_is_discarded() {
        let store = MemorySnapshotStore::new();
        let bad = SessionState {
            cycle: 9,
            ..working_state()
        };
        store
            .write(&serde_json::to_string(&bad).unwrap(), "other:1")
            .unwrap();
        let mut persistence = Persistence::new(Box::new(store.clone()));
        assert_eq!(persistence.load(4), None);
    }

    #[test]
    fn stamps_are_unique_per_write() {
        let store = MemorySnapshotStore::new();
        let mut persistence = Persistence::new(Box::new(store.clone()));
        let first = persistence.save(&working_state()).unwrap();
        let second = persistence.clear().unwrap();
        assert_ne!(first, second);
        assert_eq!(persistence.current_stamp(), Some(second.clone()));
        assert!(second.starts_with(&persistence.context_id().to_string()));
    }

    #[test]
    fn kv_store_round_trips_through_sqlite() {
        let db = Database::open_memory().unwrap();
        let mut persistence = Persistence::new(Box::new(KvSnapshotStore::new(db)));
        let stamp = persistence.save(&working_state()).unwrap();
        assert_eq!(persistence.current_stamp(), Some(stamp));
        assert_eq!(persistence.load(4), Some(working_state()));
        persistence.clear().unwrap();
        assert_eq!(persistence.load(4), None);
    }
}
