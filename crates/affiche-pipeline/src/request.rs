//! The immutable per-run request.
//!
//! A [`RunRequest`] is created once by the caller (CLI, GUI, test)
//! and never mutated for the duration of a run. It is serde-
//! serializable so a surrounding application can persist last-used
//! settings without the core ever touching ambient global state.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::compose::FitPolicy;
use crate::error::PaperError;
use crate::geometry::{self, Dimensions};
use crate::paper::PaperSpec;
use crate::plan::PlanPolicy;

/// Model identifier used when the caller does not pick one.
pub const DEFAULT_MODEL: &str = "realesrgan-x4plus";

/// DPI at and above which runs are rejected unless the caller sets
/// [`RunRequest::allow_high_dpi`]. A guardrail against accidental
/// multi-gigabyte posters.
pub const RESTRICTED_DPI: u32 = 600;

/// Everything needed to turn one source image into one poster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Source raster image.
    pub input: PathBuf,
    /// Directory the finished poster is written into (created if
    /// missing).
    pub output_dir: PathBuf,
    /// Physical print surface.
    pub paper: PaperSpec,
    /// Intended print resolution; also written into the output's DPI
    /// tag.
    pub dpi: u32,
    /// Portrait orientation; when false the target pixel pair is
    /// swapped.
    pub portrait: bool,
    /// Path to the external upscaling engine executable.
    pub engine_path: PathBuf,
    /// Model identifier; `<model>.param` and `<model>.bin` must exist
    /// in the engine's models directory.
    pub model: String,
    /// Tile-size hint for the engine, clamped into the safe range at
    /// invocation time.
    pub tile_size: u32,
    /// Request half-precision inference. May be disabled by the retry
    /// policy mid-pass.
    pub half_precision: bool,
    /// Permit DPI values at or above [`RESTRICTED_DPI`].
    pub allow_high_dpi: bool,
    /// Skip all engine passes when the source already meets the
    /// target size on both axes.
    pub keep_native: bool,
    /// Placement policy for the final exact-size canvas.
    pub fit: FitPolicy,
    /// RGBA padding colour for [`FitPolicy::FitWithPad`].
    pub pad_color: [u8; 4],
    /// Device index passed to the engine; always pinned explicitly,
    /// never left to the engine's auto-selection.
    pub gpu_index: u32,
    /// Pass-scheduling thresholds.
    #[serde(default)]
    pub plan: PlanPolicy,
    /// Parent directory for the run's private scratch workspace;
    /// the system temp directory when `None`.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
}

impl RunRequest {
    /// Resolve the exact target pixel dimensions for this request.
    ///
    /// Deterministic: repeated calls on the same request always agree.
    ///
    /// # Errors
    ///
    /// Returns [`PaperError`] when the paper specification is invalid.
    pub fn target_pixels(&self) -> Result<Dimensions, PaperError> {
        let (width_mm, height_mm) = self.paper.dimensions_mm()?;
        Ok(geometry::target_pixels(
            width_mm,
            height_mm,
            self.dpi,
            self.portrait,
        ))
    }
}
