use crate::state::Snapshot;

pub const GAUGE_MIN: i64 = 0;
pub const GAUGE_MAX: i64 = 100;
const UNKNOWN_LABEL: &str = "Unknown";

/// Presentation view of one device: raw label plus a 0..=100 fill level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gauge {
    pub label: String,
    pub percent: u8,
}

impl Gauge {
    /// Out-of-range values are clamped for the bar only; the label keeps the
    /// raw reading. An unknown value draws an empty bar.
    pub fn from_value(value: Option<i64>) -> Self {
        match value {
            Some(raw) => Self {
                label: raw.to_string(),
                percent: clamp_percent(raw),
            },
            None => Self {
                label: UNKNOWN_LABEL.to_string(),
                percent: 0,
            },
        }
    }
}

pub fn clamp_percent(raw: i64) -> u8 {
    // Clamped into 0..=100, so the cast cannot truncate.
    raw.clamp(GAUGE_MIN, GAUGE_MAX) as u8
}

/// Draw a bar `width` cells wide, rounding partially filled cells down.
pub fn render_bar(percent: u8, width: usize) -> String {
    let filled = usize::from(percent.min(100)) * width / 100;
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    for col in 0..width {
        bar.push(if col < filled { '#' } else { '.' });
    }
    bar.push(']');
    bar
}

/// One status line covering every device in address order.
pub fn render_line(values: &Snapshot, bar_width: usize) -> String {
    values
        .iter()
        .map(|(address, value)| {
            let gauge = Gauge::from_value(*value);
            format!(
                "Slave {address}: {} {}",
                gauge.label,
                render_bar(gauge.percent, bar_width)
            )
        })
        .collect::<Vec<_>>()
        .join(" | ")
}
