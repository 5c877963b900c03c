//! Target pixel geometry: millimetres + DPI -> exact pixel dimensions.
//!
//! This is the contract the final poster must satisfy: print software
//! divides the pixel dimensions by the embedded DPI tag to recover the
//! physical size, so the conversion here and the tag written by the
//! compositor must use the same arithmetic.

use serde::{Deserialize, Serialize};

use crate::paper::MM_PER_INCH;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Whether these dimensions meet or exceed `target` on both axes.
    #[must_use]
    pub const fn covers(self, target: Self) -> bool {
        self.width >= target.width && self.height >= target.height
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Compute the exact target pixel dimensions for a physical size.
///
/// Converts each millimetre axis to inches and multiplies by the DPI,
/// rounding to the nearest integer with a minimum of 1 pixel per axis.
/// When `portrait` is false the resulting *pixel* pair is swapped, so
/// a "594x841 mm, landscape" request yields the taller dimension as
/// the width.
///
/// Pure and deterministic: identical arguments always produce
/// identical results.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn target_pixels(width_mm: f64, height_mm: f64, dpi: u32, portrait: bool) -> Dimensions {
    let axis = |mm: f64| ((mm / MM_PER_INCH) * f64::from(dpi)).round().max(1.0) as u32;
    let (w, h) = (axis(width_mm), axis(height_mm));
    if portrait {
        Dimensions {
            width: w,
            height: h,
        }
    } else {
        Dimensions {
            width: h,
            height: w,
        }
    }
}
