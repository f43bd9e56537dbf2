use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{observer::StatusBoard, state::ReadingCache, store::SampleStore, Result};

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Reloads the reading cache from the store on a timer.
///
/// A device with no stored reading keeps whatever the cache already holds,
/// so a reload never turns a live value back into "unknown". A stored reading
/// older than the cached one is skipped as well.
pub struct RefreshScheduler {
    store: SampleStore,
    cache: Arc<ReadingCache>,
    status: Arc<StatusBoard>,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(store: SampleStore, cache: Arc<ReadingCache>, status: Arc<StatusBoard>) -> Self {
        Self {
            store,
            cache,
            status,
            interval: REFRESH_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Load the latest stored value of every device into the cache.
    /// Returns how many entries were set.
    pub async fn refresh_once(&self) -> Result<usize> {
        let mut loaded = 0;
        for address in self.cache.devices().iter() {
            match self.store.latest_reading(address).await {
                Ok(Some(reading)) => {
                    if self.cache.set(address, reading.value, reading.observed_at)? {
                        loaded += 1;
                    } else {
                        tracing::debug!(device = %address, "cache already holds a newer reading");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(device = %address, "refresh query failed: {err}");
                    self.status
                        .raise(format!("Error fetching latest data: {err}"));
                    return Err(err);
                }
            }
        }
        tracing::debug!(loaded, "cache refreshed from store");
        self.status.publish(&self.cache.snapshot());
        Ok(loaded)
    }

    /// Run the startup refresh now, then keep refreshing in the background
    /// until `shutdown` fires.
    pub async fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let _ = self.refresh_once().await;
        tokio::spawn(self.run_periodic(shutdown))
    }

    async fn run_periodic(self, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = self.refresh_once().await;
                }
            }
        }
        tracing::debug!("refresh scheduler stopped");
    }
}
