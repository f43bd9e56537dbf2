use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{device::MAX_DEVICES, serial::link::DEFAULT_RESPONSE_TIMEOUT_MS, Error, Result};

pub mod loader;

pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";
pub const DEFAULT_DEVICE_COUNT: u8 = 5;
pub const DEFAULT_DATABASE: &str = "vessel_readings.db";
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = DEFAULT_RESPONSE_TIMEOUT_MS;
const CONFIG_DIR_NAME: &str = ".vesselwatch";
const CONFIG_FILE_NAME: &str = "config.toml";

/// User-supplied settings loaded from the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Serial port the bus is attached to.
    pub device: String,
    /// Number of devices, addressed `1..=devices`.
    pub devices: u8,
    /// SQLite file holding the reading history.
    pub database: String,
    pub serial_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            devices: DEFAULT_DEVICE_COUNT,
            database: DEFAULT_DATABASE.to_string(),
            serial_timeout_ms: DEFAULT_SERIAL_TIMEOUT_MS,
        }
    }
}

impl Config {
    pub fn load_or_default() -> Result<Self> {
        loader::load_or_default()
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        loader::load_from_path(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        loader::save_to_path(self, path)
    }
}

pub(crate) fn validate(cfg: &Config) -> Result<()> {
    if cfg.device.trim().is_empty() {
        return Err(Error::Config("device must not be empty".into()));
    }
    if cfg.devices == 0 || cfg.devices > MAX_DEVICES {
        return Err(Error::Config(format!(
            "devices must be between 1 and {MAX_DEVICES}"
        )));
    }
    if cfg.database.trim().is_empty() {
        return Err(Error::Config("database must not be empty".into()));
    }
    if cfg.serial_timeout_ms == 0 {
        return Err(Error::Config("serial_timeout_ms must be positive".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn rejects_zero_devices() {
        let cfg = Config {
            devices: 0,
            ..Config::default()
        };
        let err = validate(&cfg).unwrap_err();
        assert!(format!("{err}").contains("devices must be between"));
    }

    #[test]
    fn rejects_empty_device() {
        let cfg = Config {
            device: "  ".into(),
            ..Config::default()
        };
        assert!(validate(&cfg).is_err());
    }
}
