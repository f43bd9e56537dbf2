use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::errors::{BusFault, ConnectError, ProtocolFault};
use super::session::{BusConnector, BusSession};
use crate::device::DeviceAddress;

/// What a scripted device does when it is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeReply {
    Value(u16),
    Protocol(ProtocolFault),
    Transport(io::ErrorKind),
}

/// Everything that happened on the fake bus, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Connect { ok: bool },
    Read { address: u8, register: u16 },
    Close,
}

#[derive(Default)]
struct FakeBusState {
    failing_connects: Option<usize>,
    queued: HashMap<u8, VecDeque<FakeReply>>,
    steady: HashMap<u8, FakeReply>,
    close_fails: bool,
    events: Vec<BusEvent>,
}

/// Scripted bus used in tests. Clones share the same script and event log.
#[derive(Clone, Default)]
pub struct FakeBus {
    port: String,
    state: Arc<Mutex<FakeBusState>>,
}

impl FakeBus {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeBusState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The next `attempts` connects fail.
    pub fn fail_connects(&self, attempts: usize) -> &Self {
        self.state().failing_connects = Some(attempts);
        self
    }

    /// Every connect fails from now on.
    pub fn refuse_connects(&self) -> &Self {
        self.state().failing_connects = Some(usize::MAX);
        self
    }

    /// Reply used whenever the device has nothing queued.
    pub fn steady(&self, address: u8, reply: FakeReply) -> &Self {
        self.state().steady.insert(address, reply);
        self
    }

    /// One-shot replies consumed before the steady reply.
    pub fn queue(&self, address: u8, replies: impl IntoIterator<Item = FakeReply>) -> &Self {
        self.state()
            .queued
            .entry(address)
            .or_default()
            .extend(replies);
        self
    }

    pub fn fail_close(&self) -> &Self {
        self.state().close_fails = true;
        self
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.state().events.clone()
    }

    pub fn reads(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BusEvent::Read { address, .. } => Some(address),
                _ => None,
            })
            .collect()
    }

    pub fn connect_attempts(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, BusEvent::Connect { .. }))
            .count()
    }

    pub fn closes(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, BusEvent::Close))
            .count()
    }
}

#[async_trait]
impl BusConnector for FakeBus {
    type Session = FakeSession;

    fn port(&self) -> &str {
        &self.port
    }

    async fn connect(&self) -> Result<FakeSession, ConnectError> {
        let mut state = self.state();
        let refuse = match state.failing_connects.as_mut() {
            Some(remaining) if *remaining > 0 => {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                true
            }
            _ => false,
        };
        state.events.push(BusEvent::Connect { ok: !refuse });
        if refuse {
            return Err(ConnectError::new(
                self.port.as_str(),
                io::Error::new(io::ErrorKind::NotFound, "no such port"),
            ));
        }
        Ok(FakeSession {
            bus: self.clone(),
            open: true,
        })
    }
}

pub struct FakeSession {
    bus: FakeBus,
    open: bool,
}

#[async_trait]
impl BusSession for FakeSession {
    async fn read_register(
        &mut self,
        address: DeviceAddress,
        register: u16,
    ) -> Result<u16, BusFault> {
        let mut state = self.bus.state();
        let raw = address.get();
        state.events.push(BusEvent::Read {
            address: raw,
            register,
        });
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "session closed").into());
        }
        let queued = state.queued.get_mut(&raw).and_then(VecDeque::pop_front);
        let reply = queued
            .or_else(|| state.steady.get(&raw).cloned())
            .unwrap_or(FakeReply::Protocol(ProtocolFault::NoResponse { address: raw }));
        match reply {
            FakeReply::Value(value) => Ok(value),
            FakeReply::Protocol(fault) => Err(fault.into()),
            FakeReply::Transport(kind) => Err(io::Error::new(kind, "link lost").into()),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let mut state = self.bus.state();
        state.events.push(BusEvent::Close);
        if state.close_fails {
            return Err(io::Error::other("close failed"));
        }
        Ok(())
    }
}
