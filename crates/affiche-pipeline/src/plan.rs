//! Pass scheduling: how many engine passes, at what scale factor, and
//! which slice of the progress range each step owns.
//!
//! Engine passes exist only to add real detail at coarse multiples
//! (4x, 2x); fine-grained sizing is resample work and is always left
//! to the compositor's final Lanczos pass. The thresholds below decide
//! where that boundary sits and are empirical tuning inherited from
//! field use -- they are plain policy fields so they can be re-tuned
//! against a different engine without touching scheduler logic.

use serde::{Deserialize, Serialize};

use crate::geometry::Dimensions;
use crate::progress::ProgressWindow;

/// Hard cap on engine passes per run.
///
/// The scheduler recomputes the remaining enlargement from each pass's
/// *actual* output dimensions, so an engine that fails to enlarge
/// would otherwise keep a run looping forever.
pub const MAX_PASSES: usize = 3;

/// Progress emitted once validation completes, before the first pass.
pub const BASE_PROGRESS: u8 = 10;

/// Fixed progress windows for passes 1..=3. The first pass gets the
/// largest share; indexes past the end reuse the last window.
const PASS_WINDOWS: [ProgressWindow; MAX_PASSES] = [
    ProgressWindow {
        start: BASE_PROGRESS,
        width: 45,
    },
    ProgressWindow {
        start: 55,
        width: 30,
    },
    ProgressWindow {
        start: 85,
        width: 3,
    },
];

/// Progress window for the final compositing + DPI tagging step.
/// Always ends at exactly 100.
pub const COMPOSE_WINDOW: ProgressWindow = ProgressWindow {
    start: 88,
    width: 12,
};

/// The progress window allocated to the pass at `index` (0-based).
#[must_use]
pub const fn window_for_pass(index: usize) -> ProgressWindow {
    if index < MAX_PASSES {
        PASS_WINDOWS[index]
    } else {
        PASS_WINDOWS[MAX_PASSES - 1]
    }
}

/// Thresholds deciding the scale factor of the next engine pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanPolicy {
    /// Enlargement ratio above which a 4x pass is scheduled.
    pub quad_threshold: f64,
    /// Enlargement ratio above which a 2x pass is scheduled.
    pub double_threshold: f64,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        Self {
            quad_threshold: 3.2,
            double_threshold: 1.6,
        }
    }
}

impl PlanPolicy {
    /// Scale factor for the next pass, or `None` when the remaining
    /// gap should be closed by the compositor's resample instead.
    #[must_use]
    pub fn next_scale(&self, current: Dimensions, target: Dimensions) -> Option<u32> {
        let need = enlargement_needed(current, target);
        if need > self.quad_threshold {
            Some(4)
        } else if need > self.double_threshold {
            Some(2)
        } else {
            None
        }
    }
}

/// The linear enlargement ratio still required to reach `target`.
///
/// Taken as the maximum over both axes so the scheduled passes always
/// reach or exceed the target in every direction.
#[must_use]
pub fn enlargement_needed(current: Dimensions, target: Dimensions) -> f64 {
    let w = f64::from(target.width) / f64::from(current.width.max(1));
    let h = f64::from(target.height) / f64::from(current.height.max(1));
    w.max(h)
}

/// One planned engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStep {
    /// Nominal linear scale factor of this pass.
    pub scale: u32,
    /// Progress window allocated to this pass.
    pub window: ProgressWindow,
}

/// Build the nominal pass plan from `current` to `target`.
///
/// Assumes each pass multiplies dimensions exactly by its scale
/// factor, which real engines only approximate; the plan is therefore
/// advisory (logging, UI display). Execution re-decides after every
/// pass from the actual output dimensions via
/// [`PlanPolicy::next_scale`].
#[must_use]
pub fn plan_passes(current: Dimensions, target: Dimensions, policy: &PlanPolicy) -> Vec<PassStep> {
    let mut passes = Vec::new();
    let mut dims = current;
    while passes.len() < MAX_PASSES {
        let Some(scale) = policy.next_scale(dims, target) else {
            break;
        };
        passes.push(PassStep {
            scale,
            window: window_for_pass(passes.len()),
        });
        dims = Dimensions {
            width: dims.width.saturating_mul(scale),
            height: dims.height.saturating_mul(scale),
        };
    }
    passes
}
