use std::time::Duration;

/// Fixed-delay, unbounded retry policy for opening the bus.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delay: Duration,
    failures: u64,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self { delay, failures: 0 }
    }

    /// Record a failed attempt and return how long to wait before the next one.
    pub fn mark_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay
    }

    pub fn mark_success(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}
