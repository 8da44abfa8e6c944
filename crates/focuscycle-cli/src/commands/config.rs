use clap::Subcommand;
use focuscycle_core::{Config, ConfigError};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g. "timing.work_secs", "notifications.pre_notify")
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// List all config values
    List,
    /// Reset config to defaults
    Reset,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key).ok_or(ConfigError::UnknownKey(key))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("ok");
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list() {
                println!("{key} = {value}");
            }
        }
        ConfigAction::Reset => {
            let config = Config::default();
            config.save()?;
            println!("config reset to defaults");
        }
    }
    Ok(())
}
