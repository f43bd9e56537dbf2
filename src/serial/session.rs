use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

use super::errors::{map_serial_error, BusFault, ConnectError};
use super::link::LinkParams;
use super::rtu;
use crate::device::DeviceAddress;

/// Opens sessions on the bus. Retrying is the caller's business.
#[async_trait]
pub trait BusConnector: Send + Sync {
    type Session: BusSession;

    /// Port identifier, used in operator-facing messages.
    fn port(&self) -> &str;

    async fn connect(&self) -> Result<Self::Session, ConnectError>;
}

/// An open bus. Only one transaction is in flight at a time since every
/// call takes `&mut self`.
#[async_trait]
pub trait BusSession: Send {
    async fn read_register(
        &mut self,
        address: DeviceAddress,
        register: u16,
    ) -> Result<u16, BusFault>;

    /// Release the transport. Calling it again is a no-op.
    async fn close(&mut self) -> io::Result<()>;
}

/// Connector for a real serial port speaking Modbus RTU.
#[derive(Debug, Clone)]
pub struct SerialBusConnector {
    port: String,
    params: LinkParams,
}

impl SerialBusConnector {
    pub fn new(port: impl Into<String>, params: LinkParams) -> Self {
        Self {
            port: port.into(),
            params,
        }
    }
}

#[async_trait]
impl BusConnector for SerialBusConnector {
    type Session = SerialBusSession;

    fn port(&self) -> &str {
        &self.port
    }

    async fn connect(&self) -> Result<SerialBusSession, ConnectError> {
        if self.port.is_empty() {
            return Err(ConnectError::new(
                "",
                io::Error::new(io::ErrorKind::InvalidInput, "device path cannot be empty"),
            ));
        }

        let stream = self
            .params
            .builder(&self.port)
            .open_native_async()
            .map_err(|err| ConnectError::new(self.port.as_str(), map_serial_error(err)))?;

        tracing::info!(port = %self.port, baud = self.params.baud, "serial connected");
        Ok(SerialBusSession {
            port: self.port.clone(),
            stream: Some(stream),
            response_timeout: self.params.response_timeout,
        })
    }
}

pub struct SerialBusSession {
    port: String,
    stream: Option<SerialStream>,
    response_timeout: Duration,
}

#[async_trait]
impl BusSession for SerialBusSession {
    async fn read_register(
        &mut self,
        address: DeviceAddress,
        register: u16,
    ) -> Result<u16, BusFault> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            BusFault::from(io::Error::new(
                io::ErrorKind::NotConnected,
                "serial port already closed",
            ))
        })?;

        // Leftovers from a late reply would desync the next frame.
        stream
            .clear(ClearBuffer::Input)
            .map_err(|err| BusFault::from(map_serial_error(err)))?;

        rtu::read_holding_register(stream, address.get(), register, self.response_timeout).await
    }

    async fn close(&mut self) -> io::Result<()> {
        match self.stream.take() {
            Some(mut stream) => {
                tracing::debug!(port = %self.port, "closing serial port");
                stream.shutdown().await
            }
            None => Ok(()),
        }
    }
}
