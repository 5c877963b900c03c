//! Per-attempt engine parameters and the retry relaxation policy.
//!
//! The external engine intermittently produces failures or corrupt
//! frames under certain device/precision combinations. Rather than
//! mutating shared state across a retry loop, each attempt runs with
//! an immutable [`AttemptParams`] value and the next attempt's
//! parameters come from the pure [`relaxed`](AttemptParams::relaxed)
//! function, keeping the policy testable in isolation.

use serde::{Deserialize, Serialize};

/// Smallest tile size the engine is ever asked to process.
pub const TILE_MIN: u32 = 64;

/// Largest tile size the engine is ever asked to process. Larger
/// tiles risk device memory exhaustion.
pub const TILE_MAX: u32 = 512;

/// Engine parameters for a single invocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptParams {
    /// Tile size bounding how much image area the engine processes at
    /// once. Always within `[TILE_MIN, TILE_MAX]`.
    pub tile_size: u32,
    /// Whether the engine runs in reduced-precision mode. Faster, but
    /// the known source of blank/black output frames.
    pub half_precision: bool,
}

impl AttemptParams {
    /// Build first-attempt parameters, clamping `tile_size` into the
    /// safe range. Callers should log when the clamp changed the
    /// requested value.
    #[must_use]
    pub const fn new(tile_size: u32, half_precision: bool) -> Self {
        let tile_size = if tile_size < TILE_MIN {
            TILE_MIN
        } else if tile_size > TILE_MAX {
            TILE_MAX
        } else {
            tile_size
        };
        Self {
            tile_size,
            half_precision,
        }
    }

    /// Parameters for the next retry attempt.
    ///
    /// Relaxation order is fixed: first disable half-precision, then
    /// halve the tile size (never below [`TILE_MIN`]). Half-precision,
    /// once disabled, stays disabled for the remainder of the pass.
    #[must_use]
    pub const fn relaxed(self) -> Self {
        if self.half_precision {
            Self {
                half_precision: false,
                ..self
            }
        } else {
            let halved = self.tile_size / 2;
            Self {
                tile_size: if halved < TILE_MIN { TILE_MIN } else { halved },
                ..self
            }
        }
    }
}
