use std::time::Duration;

use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilder, StopBits};

pub const BUS_BAUD: u32 = 9_600;
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1_000;

/// Transport parameters of the field bus. Everything except the response
/// timeout is fixed for this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    pub baud: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub response_timeout: Duration,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            baud: BUS_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
        }
    }
}

impl LinkParams {
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Builder for the given port, configured with these parameters.
    pub fn builder(&self, port: &str) -> SerialPortBuilder {
        tokio_serial::new(port, self.baud)
            .data_bits(self.data_bits)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .flow_control(FlowControl::None)
            .timeout(self.response_timeout)
    }
}
