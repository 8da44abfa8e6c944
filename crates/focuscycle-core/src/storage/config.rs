//! TOML-based application configuration.
//!
//! Stores:
//! - Phase durations and the set cadence
//! - Interruption resolution thresholds
//! - Recovery limits (abandonment ceiling, catch-up fuse)
//! - Watchdog tuning for the timing worker
//! - Confirmation window and notification toggles
//!
//! Configuration is stored at `~/.config/focuscycle/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::{ConfigError, CoreError};

/// Phase durations and thresholds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_work_secs")]
    pub work_secs: u64,
    #[serde(default = "default_short_break_secs")]
    pub short_break_secs: u64,
    #[serde(default = "default_long_break_secs")]
    pub long_break_secs: u64,
    #[serde(default = "default_ban_secs")]
    pub ban_secs: u64,
    #[serde(default = "default_pre_notify_secs")]
    pub pre_notify_secs: u64,
    #[serde(default = "default_cycles_per_set")]
    pub cycles_per_set: u32,
    /// Interruptions up to this much elapsed work restart from zero.
    #[serde(default = "default_interrupt_restart_secs")]
    pub interrupt_restart_secs: u64,
    /// Interruptions up to this much elapsed work get a makeup break.
    #[serde(default = "default_interrupt_makeup_secs")]
    pub interrupt_makeup_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Sessions unobserved for longer than this are discarded.
    #[serde(default = "default_abandon_after_secs")]
    pub abandon_after_secs: u64,
    #[serde(default = "default_max_catchup_steps")]
    pub max_catchup_steps: u32,
    /// A gap between pumps longer than this counts as a suspension.
    #[serde(default = "default_suspend_gap_ms")]
    pub suspend_gap_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    #[serde(default = "default_max_recycles")]
    pub max_recycles: u32,
    /// Tick cadence of the worker thread.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Tick cadence of the in-process fallback.
    #[serde(default = "default_fallback_interval_ms")]
    pub fallback_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmConfig {
    #[serde(default = "default_confirm_window_ms")]
    pub window_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub pre_notify: bool,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/focuscycle/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub confirm: ConfirmConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

// Default functions
fn default_work_secs() -> u64 {
    25 * 60
}
fn default_short_break_secs() -> u64 {
    5 * 60 + 30
}
fn default_long_break_secs() -> u64 {
    25 * 60
}
fn default_ban_secs() -> u64 {
    3 * 60
}
fn default_pre_notify_secs() -> u64 {
    60
}
fn default_cycles_per_set() -> u32 {
    4
}
fn default_interrupt_restart_secs() -> u64 {
    5 * 60
}
fn default_interrupt_makeup_secs() -> u64 {
    20 * 60
}
fn default_abandon_after_secs() -> u64 {
    4 * 60 * 60
}
fn default_max_catchup_steps() -> u32 {
    128
}
fn default_suspend_gap_ms() -> u64 {
    3_000
}
fn default_check_interval_ms() -> u64 {
    2_000
}
fn default_stale_after_ms() -> u64 {
    5_000
}
fn default_max_recycles() -> u32 {
    3
}
fn default_tick_interval_ms() -> u64 {
    100
}
fn default_fallback_interval_ms() -> u64 {
    1_000
}
fn default_confirm_window_ms() -> u64 {
    3_000
}
fn default_true() -> bool {
    true
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            work_secs: default_work_secs(),
            short_break_secs: default_short_break_secs(),
            long_break_secs: default_long_break_secs(),
            ban_secs: default_ban_secs(),
            pre_notify_secs: default_pre_notify_secs(),
            cycles_per_set: default_cycles_per_set(),
            interrupt_restart_secs: default_interrupt_restart_secs(),
            interrupt_makeup_secs: default_interrupt_makeup_secs(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            abandon_after_secs: default_abandon_after_secs(),
            max_catchup_steps: default_max_catchup_steps(),
            suspend_gap_ms: default_suspend_gap_ms(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
            max_recycles: default_max_recycles(),
            tick_interval_ms: default_tick_interval_ms(),
            fallback_interval_ms: default_fallback_interval_ms(),
        }
    }
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            window_ms: default_confirm_window_ms(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pre_notify: true,
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => serde_json::Value::Number(
                        value
                            .parse::<u64>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?
                            .into(),
                    ),
                    serde_json::Value::Object(_) => return Err(unknown()),
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    fn collect_leaves(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
        match value {
            serde_json::Value::Object(map) => {
                for (k, v) in map {
                    let key = if prefix.is_empty() {
                        k.clone()
                    } else {
                        format!("{prefix}.{k}")
                    };
                    Self::collect_leaves(&key, v, out);
                }
            }
            serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
            other => out.push((prefix.to_string(), other.to_string())),
        }
    }

    pub fn path() -> Result<PathBuf, CoreError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults if the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// fails validation, or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, CoreError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), CoreError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), CoreError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Rejects values the phase machine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        let durations = [
            ("timing.work_secs", t.work_secs),
            ("timing.short_break_secs", t.short_break_secs),
            ("timing.long_break_secs", t.long_break_secs),
            ("timing.ban_secs", t.ban_secs),
        ];
        for (key, secs) in durations {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "duration must be positive".into(),
                });
            }
        }
        if t.cycles_per_set == 0 {
            return Err(ConfigError::InvalidValue {
                key: "timing.cycles_per_set".into(),
                message: "a set needs at least one cycle".into(),
            });
        }
        if t.interrupt_restart_secs > t.interrupt_makeup_secs {
            return Err(ConfigError::InvalidValue {
                key: "timing.interrupt_restart_secs".into(),
                message: "must not exceed timing.interrupt_makeup_secs".into(),
            });
        }
        if self.recovery.max_catchup_steps == 0 {
            return Err(ConfigError::InvalidValue {
                key: "recovery.max_catchup_steps".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.watchdog.tick_interval_ms == 0 || self.watchdog.fallback_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "watchdog".into(),
                message: "tick intervals must be positive".into(),
            });
        }
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(_) => None,
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the result fails validation. `self` is untouched on error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// All leaf keys with their current values, sorted by key.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            Self::collect_leaves("", &json, &mut out);
        }
        out.sort();
        out
    }
}
