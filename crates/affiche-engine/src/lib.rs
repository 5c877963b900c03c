//! Run orchestration for `affiche`: engine installation validation,
//! subprocess upscale passes with retry and streamed progress, and
//! final exact-size compositing.
//!
//! The crate is driven through [`run`]: build a
//! [`RunRequest`](affiche_pipeline::RunRequest), wire an
//! [`EventSender`] to an event channel, and await the result. All
//! pure planning and imaging logic lives in `affiche-pipeline`; this
//! crate owns everything that touches the filesystem, the clock, or
//! the external engine process.

pub mod events;
pub mod invoke;
pub mod locate;
pub mod run;

pub use events::EventSender;
pub use invoke::{MAX_ATTEMPTS, PassError, run_pass};
pub use locate::{LocateError, ValidatedEngine, locate_engine};
pub use run::{RunError, run};
