use std::sync::{Arc, Mutex};

use crate::state::Snapshot;

/// The signals the polling core emits towards a display.
pub trait PollObserver: Send + Sync {
    fn on_error(&self, message: &str);
    fn on_error_cleared(&self);
    fn on_values_updated(&self, values: &Snapshot);
}

/// Observer that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl PollObserver for LoggingObserver {
    fn on_error(&self, message: &str) {
        tracing::warn!(%message, "status error");
    }

    fn on_error_cleared(&self) {
        tracing::info!("status error cleared");
    }

    fn on_values_updated(&self, values: &Snapshot) {
        tracing::debug!(?values, "values updated");
    }
}

/// Tracks the single active error message and forwards signals to an observer.
pub struct StatusBoard {
    active: Mutex<Option<String>>,
    observer: Arc<dyn PollObserver>,
}

impl StatusBoard {
    pub fn new(observer: Arc<dyn PollObserver>) -> Self {
        Self {
            active: Mutex::new(None),
            observer,
        }
    }

    /// Replace the active error. Always re-emitted, even for the same text.
    pub fn raise(&self, message: impl Into<String>) {
        let message = message.into();
        self.observer.on_error(&message);
        if let Ok(mut active) = self.active.lock() {
            *active = Some(message);
        }
    }

    /// Drop the active error, if any.
    pub fn clear(&self) {
        let had_error = match self.active.lock() {
            Ok(mut active) => active.take().is_some(),
            Err(_) => false,
        };
        if had_error {
            self.observer.on_error_cleared();
        }
    }

    pub fn active_error(&self) -> Option<String> {
        self.active.lock().ok().and_then(|active| active.clone())
    }

    pub fn publish(&self, values: &Snapshot) {
        self.observer.on_values_updated(values);
    }
}
