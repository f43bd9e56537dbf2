use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::sleeper::{Sleeper, TokioSleeper};
use crate::{
    device::{DeviceAddress, DeviceSet},
    observer::StatusBoard,
    serial::{backoff::RetryPolicy, BusConnector, BusSession},
    state::ReadingCache,
    store::{Reading, SampleStore},
};

pub const CONNECT_RETRY: Duration = Duration::from_secs(5);
pub const CYCLE_INTERVAL: Duration = Duration::from_secs(5);
pub const FAULT_PAUSE: Duration = Duration::from_secs(5);

const TRANSPORT_FAULT_MESSAGE: &str = "Serial exception occurred. Reconnecting...";
const CLOSE_FAILED_MESSAGE: &str = "Error closing port";

/// Waits used by the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    pub connect_retry: Duration,
    pub cycle_interval: Duration,
    pub fault_pause: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            connect_retry: CONNECT_RETRY,
            cycle_interval: CYCLE_INTERVAL,
            fault_pause: FAULT_PAUSE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Disconnected,
    Connecting,
    Polling,
    Faulted,
}

/// Outcome of one pass over the device set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub recorded: Vec<DeviceAddress>,
    pub missed: Vec<DeviceAddress>,
    pub store_failures: usize,
    pub transport_fault: bool,
}

impl CycleReport {
    /// Every device answered and every reading was stored.
    pub fn is_clean(&self) -> bool {
        !self.transport_fault && self.missed.is_empty() && self.store_failures == 0
    }
}

/// Owns the bus and keeps polling it for the life of the process.
///
/// `DISCONNECTED -> CONNECTING -> POLLING -> (FAULTED -> CONNECTING)`. No
/// fault ends the loop: connect failures are retried forever, transport
/// faults tear the session down and reconnect, and per-device faults are
/// reported and skipped.
pub struct PollController<C: BusConnector> {
    connector: C,
    session: Option<C::Session>,
    state: PollState,
    devices: DeviceSet,
    store: SampleStore,
    cache: Arc<ReadingCache>,
    status: Arc<StatusBoard>,
    sleeper: Arc<dyn Sleeper>,
    timing: PollTiming,
    retry: RetryPolicy,
    last_cycle: Option<CycleReport>,
}

impl<C: BusConnector> PollController<C> {
    pub fn new(
        connector: C,
        store: SampleStore,
        cache: Arc<ReadingCache>,
        status: Arc<StatusBoard>,
    ) -> Self {
        let timing = PollTiming::default();
        Self {
            connector,
            session: None,
            state: PollState::Disconnected,
            devices: cache.devices(),
            store,
            cache,
            status,
            sleeper: Arc::new(TokioSleeper),
            timing,
            retry: RetryPolicy::fixed(timing.connect_retry),
            last_cycle: None,
        }
    }

    pub fn with_timing(mut self, timing: PollTiming) -> Self {
        self.timing = timing;
        self.retry = RetryPolicy::fixed(timing.connect_retry);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn last_cycle(&self) -> Option<&CycleReport> {
        self.last_cycle.as_ref()
    }

    /// Poll until `shutdown` fires, then close the bus.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            port = %self.connector.port(),
            devices = self.devices.len(),
            "poll loop started"
        );
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.step() => {}
            }
        }
        self.shutdown().await;
        tracing::info!("poll loop stopped");
    }

    /// Perform one state transition and return the state it left us in.
    pub async fn step(&mut self) -> PollState {
        match self.state {
            PollState::Disconnected => self.state = PollState::Connecting,
            PollState::Connecting => self.try_connect().await,
            PollState::Polling => {
                let report = self.poll_cycle().await;
                if report.transport_fault {
                    self.state = PollState::Faulted;
                } else {
                    self.sleeper.sleep(self.timing.cycle_interval).await;
                }
                self.last_cycle = Some(report);
            }
            PollState::Faulted => {
                self.teardown().await;
                self.state = PollState::Connecting;
            }
        }
        self.state
    }

    /// Close the active session, if any. Close failures are only reported.
    pub async fn shutdown(&mut self) {
        self.teardown().await;
        self.state = PollState::Disconnected;
    }

    async fn try_connect(&mut self) {
        match self.connector.connect().await {
            Ok(session) => {
                if self.retry.failures() > 0 {
                    tracing::info!(
                        failed_attempts = self.retry.failures(),
                        "bus connected after retrying"
                    );
                }
                self.retry.mark_success();
                self.session = Some(session);
                self.state = PollState::Polling;
            }
            Err(err) => {
                let delay = self.retry.mark_failure();
                tracing::warn!(
                    "serial connect failed: {err}; retry {} in {}",
                    self.retry.failures(),
                    humantime::format_duration(delay)
                );
                self.status.raise(format!(
                    "Could not connect to the device via {}",
                    self.connector.port()
                ));
                self.sleeper.sleep(delay).await;
            }
        }
    }

    async fn poll_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let Some(session) = self.session.as_mut() else {
            report.transport_fault = true;
            return report;
        };

        let devices = self.devices;
        for address in devices.iter() {
            match session.read_register(address, address.register()).await {
                Ok(raw) => {
                    let value = i64::from(raw);
                    let reading = Reading::new(address, value, self.store.next_stamp());
                    if let Err(err) = self.store.append(&reading).await {
                        tracing::warn!(device = %address, "saving reading failed: {err}");
                        self.status.raise(format!("Error saving to database: {err}"));
                        report.store_failures += 1;
                    }
                    if let Err(err) = self.cache.set(address, value, reading.observed_at) {
                        tracing::warn!(device = %address, "cache update failed: {err}");
                    }
                    tracing::debug!(device = %address, value, "reading recorded");
                    report.recorded.push(address);
                }
                Err(fault) if fault.is_transport() => {
                    tracing::warn!(device = %address, "{fault}; scheduling reconnect");
                    self.status.raise(TRANSPORT_FAULT_MESSAGE);
                    report.transport_fault = true;
                    break;
                }
                Err(fault) => {
                    tracing::warn!(device = %address, "read failed: {fault}; keeping session");
                    self.status
                        .raise(format!("Unexpected error polling device {address}: {fault}"));
                    report.missed.push(address);
                    self.sleeper.sleep(self.timing.fault_pause).await;
                }
            }
        }

        if !report.recorded.is_empty() {
            self.status.publish(&self.cache.snapshot());
        }
        if report.is_clean() {
            self.status.clear();
        }
        report
    }

    async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.close().await {
                tracing::warn!("closing serial port failed: {err}");
                self.status.raise(CLOSE_FAILED_MESSAGE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::sleeper::InstantSleeper;
    use crate::observer::testing::{RecordingObserver, Signal};
    use crate::serial::fake::{BusEvent, FakeBus, FakeReply};
    use crate::serial::ProtocolFault;

    struct Rig {
        bus: FakeBus,
        store: SampleStore,
        cache: Arc<ReadingCache>,
        observer: Arc<RecordingObserver>,
        sleeper: Arc<InstantSleeper>,
        controller: PollController<FakeBus>,
        _dir: tempfile::TempDir,
    }

    async fn rig(devices: u8) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path().join("poll.db")).await.unwrap();
        let cache = Arc::new(ReadingCache::new(DeviceSet::new(devices).unwrap()));
        let observer = Arc::new(RecordingObserver::default());
        let status = Arc::new(StatusBoard::new(observer.clone()));
        let sleeper = Arc::new(InstantSleeper::default());
        let bus = FakeBus::new("fake0");
        let controller = PollController::new(bus.clone(), store.clone(), cache.clone(), status)
            .with_sleeper(sleeper.clone());
        Rig {
            bus,
            store,
            cache,
            observer,
            sleeper,
            controller,
            _dir: dir,
        }
    }

    fn addr(raw: u8) -> DeviceAddress {
        DeviceAddress::new(raw).unwrap()
    }

    #[tokio::test]
    async fn connects_then_polls_in_ascending_order() {
        let mut rig = rig(3).await;
        for raw in 1..=3 {
            rig.bus.steady(raw, FakeReply::Value(u16::from(raw) * 10));
        }

        assert_eq!(rig.controller.step().await, PollState::Connecting);
        assert_eq!(rig.controller.step().await, PollState::Polling);
        assert_eq!(rig.controller.step().await, PollState::Polling);

        assert_eq!(
            rig.bus.events(),
            vec![
                BusEvent::Connect { ok: true },
                BusEvent::Read { address: 1, register: 0 },
                BusEvent::Read { address: 2, register: 1 },
                BusEvent::Read { address: 3, register: 2 },
            ]
        );
        assert_eq!(rig.cache.get(addr(2)), Some(20));
        assert_eq!(rig.store.count().await.unwrap(), 3);
        assert!(rig.controller.last_cycle().unwrap().is_clean());
        assert_eq!(rig.sleeper.waits(), vec![CYCLE_INTERVAL]);
    }

    #[tokio::test]
    async fn connect_failures_retry_forever_with_fixed_delay() {
        let mut rig = rig(2).await;
        rig.bus.refuse_connects();

        for _ in 0..25 {
            rig.controller.step().await;
        }

        assert_eq!(rig.controller.state(), PollState::Connecting);
        assert_eq!(rig.bus.connect_attempts(), 24);
        assert!(rig.sleeper.waits().iter().all(|w| *w == CONNECT_RETRY));
        let errors = rig.observer.errors();
        assert_eq!(errors.len(), 24);
        assert!(errors
            .iter()
            .all(|e| e == "Could not connect to the device via fake0"));
    }

    #[tokio::test]
    async fn clean_cycle_clears_previous_error() {
        let mut rig = rig(1).await;
        rig.bus.fail_connects(1).steady(1, FakeReply::Value(5));

        rig.controller.step().await;
        rig.controller.step().await;
        rig.controller.step().await;
        rig.controller.step().await;

        let signals = rig.observer.signals();
        assert_eq!(
            signals.first(),
            Some(&Signal::Error("Could not connect to the device via fake0".into()))
        );
        assert_eq!(signals.last(), Some(&Signal::Cleared));
        assert!(signals.iter().any(|s| matches!(s, Signal::Values(_))));
    }

    #[tokio::test]
    async fn device_fault_keeps_session_and_pauses() {
        let mut rig = rig(2).await;
        rig.bus
            .steady(1, FakeReply::Protocol(ProtocolFault::Exception { address: 1, code: 2 }))
            .steady(2, FakeReply::Value(9));

        rig.controller.step().await;
        rig.controller.step().await;
        assert_eq!(rig.controller.step().await, PollState::Polling);

        let report = rig.controller.last_cycle().unwrap();
        assert_eq!(report.missed, vec![addr(1)]);
        assert_eq!(report.recorded, vec![addr(2)]);
        assert_eq!(rig.bus.closes(), 0);
        assert_eq!(rig.sleeper.waits(), vec![FAULT_PAUSE, CYCLE_INTERVAL]);
        assert_eq!(
            rig.observer.errors(),
            vec!["Unexpected error polling device 1: device 1 answered with exception code 2"]
        );
    }

    #[tokio::test]
    async fn transport_fault_tears_down_and_reconnects() {
        let mut rig = rig(3).await;
        rig.bus
            .steady(1, FakeReply::Value(1))
            .queue(2, [FakeReply::Transport(std::io::ErrorKind::BrokenPipe)])
            .steady(2, FakeReply::Value(2))
            .steady(3, FakeReply::Value(3));

        rig.controller.step().await;
        rig.controller.step().await;
        assert_eq!(rig.controller.step().await, PollState::Faulted);
        assert_eq!(rig.controller.step().await, PollState::Connecting);
        assert_eq!(rig.bus.closes(), 1);
        assert_eq!(rig.controller.step().await, PollState::Polling);
        assert_eq!(rig.bus.connect_attempts(), 2);
        assert_eq!(
            rig.observer.errors(),
            vec!["Serial exception occurred. Reconnecting..."]
        );
    }

    #[tokio::test]
    async fn insert_failure_is_reported_and_cache_still_updates() {
        let mut rig = rig(2).await;
        rig.bus
            .steady(1, FakeReply::Value(4))
            .steady(2, FakeReply::Value(6));

        rig.controller.step().await;
        rig.controller.step().await;
        rig.store.close().await;
        assert_eq!(rig.controller.step().await, PollState::Polling);

        let report = rig.controller.last_cycle().unwrap();
        assert_eq!(report.store_failures, 2);
        assert_eq!(report.recorded, vec![addr(1), addr(2)]);
        assert!(!report.is_clean());
        assert_eq!(rig.cache.get(addr(1)), Some(4));
        assert_eq!(rig.cache.get(addr(2)), Some(6));
        assert_eq!(rig.bus.reads(), vec![1, 2]);

        let errors = rig.observer.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| e.starts_with("Error saving to database: ")));
        assert!(!rig.observer.signals().contains(&Signal::Cleared));
        assert_eq!(rig.sleeper.waits(), vec![CYCLE_INTERVAL]);
    }

    #[tokio::test]
    async fn close_failure_is_reported_not_fatal() {
        let mut rig = rig(1).await;
        rig.bus
            .fail_close()
            .queue(1, [FakeReply::Transport(std::io::ErrorKind::NotFound)]);

        rig.controller.step().await;
        rig.controller.step().await;
        rig.controller.step().await;
        assert_eq!(rig.controller.step().await, PollState::Connecting);
        assert_eq!(
            rig.observer.errors().last().map(String::as_str),
            Some("Error closing port")
        );
    }

    #[tokio::test]
    async fn run_closes_session_on_shutdown() {
        let rig = rig(1).await;
        rig.bus.steady(1, FakeReply::Value(3));
        let bus = rig.bus.clone();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(rig.controller.run(shutdown.clone()));

        while bus.reads().len() < 3 {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(bus.closes(), 1);
    }
}
