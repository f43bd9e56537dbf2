//! Presentation side: clamping, gauge text, and a console consumer of the cache.

pub mod console;
pub mod gauge;

pub use console::{run_console, DISPLAY_TICK};
pub use gauge::{render_line, Gauge};
