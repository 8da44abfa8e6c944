//! Core error types for focuscycle-core.
//!
//! Errors are split by concern using thiserror. Only configuration and
//! storage bootstrap errors are meant to reach the user; everything raised
//! while a session is running is logged and converted into a recovery path.

use std::path::PathBuf;
use thiserror::Error;

use crate::session::Phase;

/// Core error type for focuscycle-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A user action that the current phase does not accept
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Timing source failures
    #[error("Time source error: {0}")]
    TimeSource(#[from] TimeSourceError),

    /// Persisted snapshot could not be used
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dotted key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),
}

/// Rejected session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The action is not accepted in the current phase
    #[error("'{action}' is not allowed while {phase}")]
    NotAllowed { action: &'static str, phase: Phase },

    /// Invalid argument for a session operation
    #[error("Invalid value for '{field}': {message}")]
    InvalidArgument { field: String, message: String },
}

/// Timing source failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeSourceError {
    /// The primary source cannot be created or has gone away
    #[error("time source unavailable: {0}")]
    Unavailable(String),

    /// Ticks stopped arriving while a deadline was armed
    #[error("time source stalled: no tick for {silent_ms} ms")]
    Stalled { silent_ms: u64 },
}

/// Reasons a persisted snapshot is discarded.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Payload did not parse (unknown phase, missing fields, bad JSON)
    #[error("snapshot does not parse: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Payload parsed but breaks a session invariant
    #[error("snapshot is inconsistent: {0}")]
    Invalid(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked
                    || err.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}
