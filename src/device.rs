use std::fmt;

use crate::{Error, Result};

/// Highest slave address a Modbus RTU bus can carry.
pub const MAX_DEVICES: u8 = 247;

/// Bus address of one sensor unit. Addresses start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    pub fn new(raw: u8) -> Result<Self> {
        if raw == 0 || raw > MAX_DEVICES {
            return Err(Error::UnknownDevice(raw));
        }
        Ok(Self(raw))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based slot used by the cache and as the polled register index.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    pub fn register(self) -> u16 {
        u16::from(self.0 - 1)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed set of polled devices, `1..=N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSet {
    count: u8,
}

impl DeviceSet {
    pub fn new(count: u8) -> Result<Self> {
        if count == 0 || count > MAX_DEVICES {
            return Err(Error::InvalidArgs(format!(
                "device count must be between 1 and {MAX_DEVICES}, got {count}"
            )));
        }
        Ok(Self { count })
    }

    pub fn len(&self) -> usize {
        usize::from(self.count)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contains(&self, address: DeviceAddress) -> bool {
        address.get() <= self.count
    }

    /// Ascending iteration; the bus is polled in this order.
    pub fn iter(&self) -> impl Iterator<Item = DeviceAddress> {
        (1..=self.count).map(DeviceAddress)
    }
}
