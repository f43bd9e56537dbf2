use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{Error, Result};

use super::{Config, CONFIG_DIR_NAME, CONFIG_FILE_NAME};

pub fn load_or_default() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        let cfg = Config::default();
        save_to_path(&cfg, &path)?;
        return Ok(cfg);
    }
    load_from_path(&path)
}

pub fn load_from_path(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        super::validate(&cfg)?;
        return Ok(cfg);
    }

    let raw = fs::read_to_string(path)?;
    parse(&raw)
}

pub fn save_to_path(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let body = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("cannot serialize config: {e}")))?;
    fs::write(path, format!("# vesselwatch config\n{body}"))?;
    Ok(())
}

pub fn parse(raw: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
    super::validate(&cfg)?;
    Ok(cfg)
}

fn config_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| Error::Config("HOME not set; cannot locate config directory".into()))?;
    Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("nested").join("config.toml")
    }

    #[test]
    fn loads_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_from_path(&temp_path(&dir)).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn parses_valid_config() {
        let cfg = parse(
            r#"
            device = "/dev/ttyS3"
            devices = 3
            database = "/var/lib/vesselwatch/readings.db"
            serial_timeout_ms = 750
        "#,
        )
        .unwrap();
        assert_eq!(cfg.device, "/dev/ttyS3");
        assert_eq!(cfg.devices, 3);
        assert_eq!(cfg.database, "/var/lib/vesselwatch/readings.db");
        assert_eq!(cfg.serial_timeout_ms, 750);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = parse("devices = 2").unwrap();
        assert_eq!(cfg.devices, 2);
        assert_eq!(cfg.device, Config::default().device);
    }

    #[test]
    fn rejects_unknown_key() {
        let err = parse("baud = 19200").unwrap_err();
        assert!(format!("{err}").contains("unknown field"));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse("devices = 0").is_err());
        assert!(parse("devices = 300").is_err());
        assert!(parse("serial_timeout_ms = 0").is_err());
    }

    #[test]
    fn saves_and_loads_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);
        let cfg = Config {
            device: "/dev/ttyAMA0".into(),
            devices: 8,
            database: "levels.db".into(),
            serial_timeout_ms: 400,
        };
        cfg.save_to_path(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# vesselwatch config"));
        assert_eq!(load_from_path(&path).unwrap(), cfg);
    }
}
