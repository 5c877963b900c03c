//! One-way, non-blocking event delivery to the run's consumer.
//!
//! The orchestrator must never block on -- or fail because of -- a
//! slow or departed consumer. Events go out over an unbounded channel;
//! a closed receiver is logged at debug and otherwise ignored.
//! Progress monotonicity is enforced here, at the single choke point
//! every progress value passes through.

use std::path::Path;

use affiche_pipeline::progress::{ProgressGauge, RunEvent};
use tokio::sync::mpsc;

/// Sending half of a run's event stream.
///
/// Create one per run: the embedded [`ProgressGauge`] is the run's
/// progress high-water mark, so sharing a sender across runs would
/// couple their progress sequences.
#[derive(Debug)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<RunEvent>,
    gauge: ProgressGauge,
}

impl EventSender {
    /// Wrap a channel for one run, starting with no progress recorded.
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self {
            tx,
            gauge: ProgressGauge::new(),
        }
    }

    /// Emit a progress value. Values at or below the run's high-water
    /// mark are silently dropped, keeping the delivered sequence
    /// strictly increasing.
    pub fn progress(&mut self, value: u8) {
        if let Some(accepted) = self.gauge.advance(value) {
            self.send(RunEvent::Progress(accepted));
        }
    }

    /// Emit a preview notification for an artifact. Advisory: the file
    /// may be deleted after the event is observed.
    pub fn preview(&self, path: &Path) {
        self.send(RunEvent::Preview(path.to_path_buf()));
    }

    /// The run's current progress high-water mark.
    #[must_use]
    pub const fn current_progress(&self) -> u8 {
        self.gauge.current()
    }

    fn send(&self, event: RunEvent) {
        if self.tx.send(event).is_err() {
            // Best-effort notification, not best-effort correctness:
            // a departed consumer never aborts the pipeline.
            tracing::debug!("run event dropped: receiver closed");
        }
    }
}
