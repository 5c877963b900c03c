//! affiche-pipeline: pure poster upscaling core (sans subprocess I/O).
//!
//! Maps a physical print request (paper size, DPI, orientation) to
//! exact pixel geometry, schedules coarse engine passes against that
//! geometry, and composites results to the exact target canvas with an
//! embedded DPI tag:
//!
//! paper/mm + DPI -> target pixels -> pass plan -> (passes run
//! elsewhere) -> compose + tag.
//!
//! This crate has **no subprocess or async dependencies** -- it
//! operates on in-memory values and images. Engine invocation, the
//! scratch workspace, and the run state machine live in
//! `affiche-engine`.

pub mod attempt;
pub mod compose;
pub mod error;
pub mod geometry;
pub mod naming;
pub mod paper;
pub mod plan;
pub mod progress;
pub mod request;

pub use attempt::AttemptParams;
pub use compose::FitPolicy;
pub use error::{ComposeError, PaperError};
pub use geometry::{Dimensions, target_pixels};
pub use paper::{PaperSize, PaperSpec};
pub use plan::{PassStep, PlanPolicy};
pub use progress::{ProgressGauge, ProgressWindow, RunEvent};
pub use request::RunRequest;
