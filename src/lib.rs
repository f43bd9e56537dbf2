pub mod app;
pub mod cli;
pub mod config;
pub mod device;
pub mod display;
pub mod observer;
pub mod serial;
pub mod state;
pub mod store;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("malformed data: {0}")]
    Malformed(String),
    #[error("device {0} is not configured")]
    UnknownDevice(u8),
}
