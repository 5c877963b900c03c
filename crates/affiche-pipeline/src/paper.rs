//! Physical paper sizes and print-surface specification.
//!
//! Poster geometry starts from a physical surface: either a named ISO
//! 216 A-series size or explicit millimetre dimensions. Everything
//! downstream (target pixels, output naming, the DPI tag) derives from
//! the millimetre pair this module resolves.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PaperError;

/// Millimetres per inch, the conversion constant behind all DPI math.
pub const MM_PER_INCH: f64 = 25.4;

/// ISO 216 A-series paper sizes.
///
/// Dimensions are stored in portrait orientation (width < height);
/// landscape is applied later to the resolved *pixel* pair, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperSize {
    /// 841 x 1189 mm.
    A0,
    /// 594 x 841 mm.
    A1,
    /// 420 x 594 mm.
    A2,
    /// 297 x 420 mm.
    A3,
    /// 210 x 297 mm.
    A4,
    /// 148 x 210 mm.
    A5,
}

impl PaperSize {
    /// Physical dimensions in millimetres, portrait `(width, height)`.
    #[must_use]
    pub const fn dimensions_mm(self) -> (f64, f64) {
        match self {
            Self::A0 => (841.0, 1189.0),
            Self::A1 => (594.0, 841.0),
            Self::A2 => (420.0, 594.0),
            Self::A3 => (297.0, 420.0),
            Self::A4 => (210.0, 297.0),
            Self::A5 => (148.0, 210.0),
        }
    }
}

impl FromStr for PaperSize {
    type Err = PaperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a0" => Ok(Self::A0),
            "a1" => Ok(Self::A1),
            "a2" => Ok(Self::A2),
            "a3" => Ok(Self::A3),
            "a4" => Ok(Self::A4),
            "a5" => Ok(Self::A5),
            other => Err(PaperError::Unsupported(other.to_owned())),
        }
    }
}

impl fmt::Display for PaperSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A0 => f.write_str("a0"),
            Self::A1 => f.write_str("a1"),
            Self::A2 => f.write_str("a2"),
            Self::A3 => f.write_str("a3"),
            Self::A4 => f.write_str("a4"),
            Self::A5 => f.write_str("a5"),
        }
    }
}

/// Print surface for one run: a named size or explicit millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PaperSpec {
    /// A named A-series size from the lookup table.
    Named(PaperSize),
    /// Explicit physical dimensions. Both axes must be positive;
    /// enforced by [`dimensions_mm`](Self::dimensions_mm).
    Custom {
        /// Width in millimetres.
        width_mm: f64,
        /// Height in millimetres.
        height_mm: f64,
    },
}

impl PaperSpec {
    /// Resolve to millimetre dimensions, portrait `(width, height)`.
    ///
    /// # Errors
    ///
    /// Returns [`PaperError::InvalidDimensions`] when either custom
    /// axis is zero, negative, or not finite.
    pub fn dimensions_mm(self) -> Result<(f64, f64), PaperError> {
        match self {
            Self::Named(size) => Ok(size.dimensions_mm()),
            Self::Custom {
                width_mm,
                height_mm,
            } => {
                if width_mm > 0.0 && height_mm > 0.0 && width_mm.is_finite() && height_mm.is_finite()
                {
                    Ok((width_mm, height_mm))
                } else {
                    Err(PaperError::InvalidDimensions {
                        width_mm,
                        height_mm,
                    })
                }
            }
        }
    }
}
