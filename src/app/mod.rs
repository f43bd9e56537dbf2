use crate::{
    cli::RunOptions,
    config::Config,
    device::DeviceSet,
    display::{run_console, DISPLAY_TICK},
    observer::{LoggingObserver, StatusBoard},
    serial::{LinkParams, SerialBusConnector},
    state::ReadingCache,
    store::SampleStore,
    Result,
};
use std::{path::Path, str::FromStr, sync::Arc, time::Duration};

mod lifecycle;
pub mod logger;
mod polling;
mod refresh;
mod sleeper;

use lifecycle::create_shutdown_token;
pub use logger::LogLevel;
pub use polling::{
    CycleReport, PollController, PollState, PollTiming, CONNECT_RETRY, CYCLE_INTERVAL, FAULT_PAUSE,
};
pub use refresh::{RefreshScheduler, REFRESH_INTERVAL};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper};

/// Config for the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub device: String,
    pub devices: u8,
    pub database: String,
    pub serial_timeout_ms: u64,
    pub log_level: LogLevel,
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let config = Config::default();
        Self {
            device: config.device,
            devices: config.devices,
            database: config.database,
            serial_timeout_ms: config.serial_timeout_ms,
            log_level: LogLevel::default(),
            log_file: None,
        }
    }
}

impl AppConfig {
    /// CLI values win over the config file; the file wins over built-in defaults.
    pub fn from_sources(config: Config, opts: RunOptions) -> Result<Self> {
        let log_level = match opts.log_level.as_deref() {
            Some(raw) => LogLevel::from_str(raw)?,
            None => LogLevel::default(),
        };
        Ok(Self {
            device: opts.device.unwrap_or(config.device),
            devices: opts.devices.unwrap_or(config.devices),
            database: opts.database.unwrap_or(config.database),
            serial_timeout_ms: opts.serial_timeout_ms.unwrap_or(config.serial_timeout_ms),
            log_level,
            log_file: opts.log_file,
        })
    }

    pub fn link_params(&self) -> LinkParams {
        LinkParams::default().with_response_timeout(Duration::from_millis(self.serial_timeout_ms))
    }
}

pub struct App {
    config: AppConfig,
    devices: DeviceSet,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let devices = DeviceSet::new(config.devices)?;
        if config.serial_timeout_ms == 0 {
            return Err(crate::Error::InvalidArgs(
                "serial-timeout-ms must be a positive integer".into(),
            ));
        }
        Ok(Self { config, devices })
    }

    pub fn from_options(opts: RunOptions) -> Result<Self> {
        let cfg_file = match opts.config.as_deref() {
            Some(path) => Config::load_from_path(Path::new(path))?,
            None => Config::load_or_default()?,
        };
        let merged = AppConfig::from_sources(cfg_file, opts)?;
        Self::new(merged)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Entry point for the daemon: refresh, display and poller until ctrl-c.
    pub async fn run(self) -> Result<()> {
        logger::init(self.config.log_level, self.config.log_file.as_deref())?;
        tracing::info!(
            device = %self.config.device,
            devices = self.devices.len(),
            database = %self.config.database,
            "vesselwatch starting"
        );

        let store = SampleStore::open(&self.config.database).await?;
        let cache = Arc::new(ReadingCache::new(self.devices));
        let status = Arc::new(StatusBoard::new(Arc::new(LoggingObserver)));
        let shutdown = create_shutdown_token()?;

        let refresher = RefreshScheduler::new(store.clone(), cache.clone(), status.clone())
            .start(shutdown.clone())
            .await;

        let display = tokio::spawn(run_console(
            cache.clone(),
            status.clone(),
            DISPLAY_TICK,
            std::io::stdout(),
            shutdown.clone(),
        ));

        let connector = SerialBusConnector::new(self.config.device.clone(), self.config.link_params());
        PollController::new(connector, store.clone(), cache, status)
            .run(shutdown.clone())
            .await;

        shutdown.cancel();
        for (name, handle) in [("refresh", refresher), ("display", display)] {
            if let Err(err) = handle.await {
                tracing::warn!("{name} task ended abnormally: {err}");
            }
        }
        store.close().await;
        tracing::info!("vesselwatch stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_override_file() {
        let file = Config {
            device: "/dev/ttyS0".into(),
            devices: 4,
            database: "file.db".into(),
            serial_timeout_ms: 800,
        };
        let opts = RunOptions {
            device: Some("/dev/ttyUSB1".into()),
            devices: Some(2),
            log_level: Some("debug".into()),
            ..RunOptions::default()
        };
        let cfg = AppConfig::from_sources(file, opts).unwrap();
        assert_eq!(cfg.device, "/dev/ttyUSB1");
        assert_eq!(cfg.devices, 2);
        assert_eq!(cfg.database, "file.db");
        assert_eq!(cfg.serial_timeout_ms, 800);
        assert_eq!(cfg.log_level, LogLevel::Debug);
    }

    #[test]
    fn missing_log_level_defaults_to_info() {
        let cfg = AppConfig::from_sources(Config::default(), RunOptions::default()).unwrap();
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let opts = RunOptions {
            log_level: Some("chatty".into()),
            config: Some(path.to_string_lossy().into_owned()),
            ..RunOptions::default()
        };
        let err = App::from_options(opts).err().unwrap();
        assert!(matches!(err, crate::Error::InvalidArgs(_)));
        assert!(format!("{err}").contains("unknown log level 'chatty'"));
    }

    #[test]
    fn from_options_reads_explicit_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "devices = 3\ndatabase = \"levels.db\"\n").unwrap();
        let opts = RunOptions {
            config: Some(path.to_string_lossy().into_owned()),
            ..RunOptions::default()
        };
        let app = App::from_options(opts).unwrap();
        assert_eq!(app.config().devices, 3);
        assert_eq!(app.config().database, "levels.db");
        assert_eq!(app.config().device, crate::config::DEFAULT_DEVICE);
    }

    #[test]
    fn rejects_device_count_out_of_range() {
        let cfg = AppConfig {
            devices: 0,
            ..AppConfig::default()
        };
        assert!(App::new(cfg).is_err());
    }
}
