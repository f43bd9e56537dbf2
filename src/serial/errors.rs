use std::fmt;
use std::io::ErrorKind;

/// High-level reason for a serial transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialFailureKind {
    PermissionDenied,
    DeviceMissing,
    Disconnected,
    Timeout,
    Framing,
    Busy,
    Config,
    Unknown,
}

impl SerialFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerialFailureKind::PermissionDenied => "permission_denied",
            SerialFailureKind::DeviceMissing => "device_missing",
            SerialFailureKind::Disconnected => "disconnected",
            SerialFailureKind::Timeout => "timeout",
            SerialFailureKind::Framing => "framing",
            SerialFailureKind::Busy => "busy",
            SerialFailureKind::Config => "config",
            SerialFailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SerialFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The serial port could not be opened at all.
#[derive(Debug, thiserror::Error)]
#[error("could not open {port} ({kind}): {source}")]
pub struct ConnectError {
    pub port: String,
    pub kind: SerialFailureKind,
    #[source]
    pub source: std::io::Error,
}

impl ConnectError {
    pub fn new(port: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            port: port.into(),
            kind: classify_io_error(&source),
            source,
        }
    }
}

/// A response that arrived over a working link but cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolFault {
    #[error("no response from device {address}")]
    NoResponse { address: u8 },
    #[error("crc mismatch (expected {expected:#06x}, got {actual:#06x})")]
    Crc { expected: u16, actual: u16 },
    #[error("reply from address {actual}, expected {expected}")]
    WrongAddress { expected: u8, actual: u8 },
    #[error("unexpected function code {0:#04x}")]
    WrongFunction(u8),
    #[error("unexpected byte count {0}")]
    ByteCount(u8),
    #[error("device {address} answered with exception code {code}")]
    Exception { address: u8, code: u8 },
}

/// Failure of a single register read.
#[derive(Debug, thiserror::Error)]
pub enum BusFault {
    /// The link itself is gone; the session must be discarded.
    #[error("transport fault ({kind}): {source}")]
    Transport {
        kind: SerialFailureKind,
        #[source]
        source: std::io::Error,
    },
    /// One device misbehaved; the link is presumed alive.
    #[error(transparent)]
    Protocol(#[from] ProtocolFault),
}

impl BusFault {
    pub fn is_transport(&self) -> bool {
        matches!(self, BusFault::Transport { .. })
    }
}

impl From<std::io::Error> for BusFault {
    fn from(err: std::io::Error) -> Self {
        BusFault::Transport {
            kind: classify_io_error(&err),
            source: err,
        }
    }
}

/// Map a serialport error onto std::io so it can be classified.
pub fn map_serial_error(err: tokio_serial::Error) -> std::io::Error {
    use tokio_serial::ErrorKind as SerialKind;

    let kind = match err.kind() {
        SerialKind::NoDevice => ErrorKind::NotFound,
        SerialKind::InvalidInput => ErrorKind::InvalidInput,
        SerialKind::Io(inner) => inner,
        SerialKind::Unknown => ErrorKind::Other,
    };

    std::io::Error::new(kind, err)
}

/// Classify an std::io::Error into a serial failure reason.
pub fn classify_io_error(err: &std::io::Error) -> SerialFailureKind {
    match err.kind() {
        ErrorKind::PermissionDenied => SerialFailureKind::PermissionDenied,
        ErrorKind::NotFound => SerialFailureKind::DeviceMissing,
        ErrorKind::TimedOut | ErrorKind::WouldBlock => SerialFailureKind::Timeout,
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => SerialFailureKind::Disconnected,
        ErrorKind::InvalidInput => SerialFailureKind::Config,
        ErrorKind::InvalidData => SerialFailureKind::Framing,
        _ => {
            if let Some(code) = err.raw_os_error() {
                match code {
                    // 110 = ETIMEDOUT, 5 = EIO, 6 = ENXIO, 19 = ENODEV, 13 = EACCES, 16 = EBUSY
                    13 => SerialFailureKind::PermissionDenied,
                    16 => SerialFailureKind::Busy,
                    19 | 6 => SerialFailureKind::DeviceMissing,
                    5 => SerialFailureKind::Disconnected,
                    110 => SerialFailureKind::Timeout,
                    _ => SerialFailureKind::Unknown,
                }
            } else {
                SerialFailureKind::Unknown
            }
        }
    }
}
