mod config;
pub mod database;
pub mod snapshot;

pub use config::{
    Config, ConfirmConfig, NotificationsConfig, RecoveryConfig, TimingConfig, WatchdogConfig,
};
pub use database::Database;
pub use snapshot::{KvSnapshotStore, MemorySnapshotStore, Persistence, SnapshotStore};

use std::path::PathBuf;

use crate::error::CoreError;

/// Returns `~/.config/focuscycle[-dev]/` based on FOCUSCYCLE_ENV.
///
/// Set FOCUSCYCLE_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, CoreError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("FOCUSCYCLE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("focuscycle-dev")
    } else {
        base_dir.join("focuscycle")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
