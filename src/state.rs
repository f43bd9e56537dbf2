use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use time::OffsetDateTime;

use crate::{
    device::{DeviceAddress, DeviceSet},
    Error, Result,
};

const UNKNOWN: i64 = i64::MIN;

/// Latest value per device as handed to observers.
pub type Snapshot = BTreeMap<DeviceAddress, Option<i64>>;

/// Latest known reading per device, shared between the poller, the refresh
/// timer and the display.
///
/// Each slot is a single atomic word, so a reader sees either the previous or
/// the new value for a device and never blocks. There is no cross-device
/// atomicity: a snapshot may mix values from different cycles.
///
/// Writers go through a per-slot guard holding the observation time of the
/// current value; a write carrying an older observation is dropped, so a slow
/// store reload cannot replace a value the poller has just read.
#[derive(Debug)]
pub struct ReadingCache {
    devices: DeviceSet,
    slots: Vec<AtomicI64>,
    observed: Vec<Mutex<Option<OffsetDateTime>>>,
}

impl ReadingCache {
    pub fn new(devices: DeviceSet) -> Self {
        let slots = (0..devices.len()).map(|_| AtomicI64::new(UNKNOWN)).collect();
        let observed = (0..devices.len()).map(|_| Mutex::new(None)).collect();
        Self {
            devices,
            slots,
            observed,
        }
    }

    pub fn devices(&self) -> DeviceSet {
        self.devices
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, address: DeviceAddress) -> Option<i64> {
        let raw = self.slots.get(address.index())?.load(Ordering::Acquire);
        (raw != UNKNOWN).then_some(raw)
    }

    /// When the current value of `address` was observed.
    pub fn observed_at(&self, address: DeviceAddress) -> Option<OffsetDateTime> {
        if !self.devices.contains(address) {
            return None;
        }
        *self.guard(address)
    }

    /// Store a raw value observed at `observed_at`. No clamping happens here.
    ///
    /// Returns `false` when the slot already holds a newer observation and the
    /// write was dropped.
    pub fn set(
        &self,
        address: DeviceAddress,
        value: i64,
        observed_at: OffsetDateTime,
    ) -> Result<bool> {
        if !self.devices.contains(address) {
            return Err(Error::UnknownDevice(address.get()));
        }
        let mut current = self.guard(address);
        if matches!(*current, Some(newer) if newer > observed_at) {
            return Ok(false);
        }
        self.slots[address.index()].store(value, Ordering::Release);
        *current = Some(observed_at);
        Ok(true)
    }

    fn guard(&self, address: DeviceAddress) -> MutexGuard<'_, Option<OffsetDateTime>> {
        match self.observed[address.index()].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.devices
            .iter()
            .map(|address| (address, self.get(address)))
            .collect()
    }
}
