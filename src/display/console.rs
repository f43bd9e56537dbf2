use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::gauge::render_line;
use crate::{observer::StatusBoard, state::ReadingCache};

pub const DISPLAY_TICK: Duration = Duration::from_secs(1);
const BAR_WIDTH: usize = 10;

/// Compose the text shown for the current cache contents and status.
pub fn compose(cache: &ReadingCache, status: &StatusBoard) -> String {
    let line = render_line(&cache.snapshot(), BAR_WIDTH);
    match status.active_error() {
        Some(error) => format!("{line}  !! {error}"),
        None => line,
    }
}

/// Headless gauge display: samples the cache every `tick` and prints a line
/// whenever the rendered text changes.
pub async fn run_console<W: Write + Send>(
    cache: Arc<ReadingCache>,
    status: Arc<StatusBoard>,
    tick: Duration,
    mut out: W,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick);
    let mut last_shown = String::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let text = compose(&cache, &status);
                if text != last_shown {
                    if let Err(err) = writeln!(out, "{text}") {
                        tracing::warn!("display write failed: {err}");
                    }
                    last_shown = text;
                }
            }
        }
    }
}
