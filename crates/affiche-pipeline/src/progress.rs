//! Progress accounting: event types, per-pass budget windows, percent
//! parsing, and the run-wide monotonicity guarantee.
//!
//! The external engine reports its own completion as `NN%` lines on
//! its output stream. Each pass owns a window of the run's 0-100
//! range; engine percentages are mapped linearly into that window and
//! only ever delivered through a [`ProgressGauge`], which enforces
//! that the sequence a consumer observes is non-decreasing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A notification emitted while a run executes.
///
/// Delivery is advisory and one-way: consumers must tolerate dropped
/// events, and a `Preview` path may be deleted after the event is
/// observed (intermediate artifacts live in a scratch workspace that
/// is destroyed when the run ends).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Overall run completion in percent, non-decreasing per run,
    /// exactly 100 on success.
    Progress(u8),
    /// A human-viewable intermediate or final artifact.
    Preview(PathBuf),
}

/// A slice of the run's 0-100 progress range allocated to one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressWindow {
    /// First value of the window.
    pub start: u8,
    /// Number of percentage points the window spans.
    pub width: u8,
}

impl ProgressWindow {
    /// The value this window ends at.
    #[must_use]
    pub const fn end(self) -> u8 {
        self.start.saturating_add(self.width)
    }

    /// Map a step-local completion percentage (0-100) linearly into
    /// this window.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn map(self, percent: f32) -> u8 {
        let fraction = f64::from(percent.clamp(0.0, 100.0)) / 100.0;
        let offset = (fraction * f64::from(self.width)).round() as u8;
        self.start.saturating_add(offset).min(self.end())
    }
}

/// Extract an embedded `NN%` completion marker from one output line.
///
/// Scans for the first `%` and parses the contiguous digits/decimal
/// point immediately before it. Returns `None` when the line carries
/// no marker or the number is out of the 0-100 range.
#[must_use]
pub fn parse_percent(line: &str) -> Option<f32> {
    let head = &line[..line.find('%')?];
    let start = head
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
        .last()
        .map(|(i, _)| i)?;
    head[start..]
        .parse::<f32>()
        .ok()
        .filter(|p| (0.0..=100.0).contains(p))
}

/// High-water mark enforcing run-wide progress monotonicity.
///
/// Once a value has been accepted, nothing lower (or equal) is ever
/// accepted again for the same run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressGauge {
    last: u8,
}

impl ProgressGauge {
    /// A fresh gauge with no progress recorded.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// Record `value`; returns `Some(value)` when it strictly exceeds
    /// every previously recorded value, `None` otherwise.
    pub const fn advance(&mut self, value: u8) -> Option<u8> {
        if value > self.last {
            self.last = value;
            Some(value)
        } else {
            None
        }
    }

    /// The highest value recorded so far.
    #[must_use]
    pub const fn current(self) -> u8 {
        self.last
    }
}
