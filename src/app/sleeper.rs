use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// Source of every wait in the polling core, so tests can skip real time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns at once and remembers what it was asked to wait for.
#[derive(Debug, Default)]
pub struct InstantSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
        tokio::task::yield_now().await;
    }
}
