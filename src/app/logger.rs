use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "VESSELWATCH_LOG";

/// Log verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(Error::InvalidArgs(format!("unknown log level '{other}'"))),
        }
    }
}

/// Filter for our own crate at `level`; `VESSELWATCH_LOG` wins when set.
pub fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
        format!("{app_name}={level},sqlx=warn", level = level.as_str()).into()
    })
}

/// Install the global subscriber: stderr, or an append-only file when given.
pub fn init(level: LogLevel, file_path: Option<&str>) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(build_filter(level));

    let installed = match file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    installed.map_err(|e| Error::InvalidArgs(format!("logger already initialised: {e}")))
}
