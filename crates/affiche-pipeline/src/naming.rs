//! Deterministic output file naming.
//!
//! Final posters are named from the input's base name plus the
//! resolved physical size and DPI, so a directory of outputs is
//! self-describing: `photo__594x841mm_300dpi.png`. Collision handling
//! (numeric suffixes) is the caller's job since it needs filesystem
//! probing; the formatting here stays pure.

/// The output file name for a run, without collision suffix.
#[must_use]
pub fn output_file_name(stem: &str, width_mm: f64, height_mm: f64, dpi: u32) -> String {
    format!("{stem}__{width_mm:.0}x{height_mm:.0}mm_{dpi}dpi.png")
}

/// A numbered variant of [`output_file_name`], used when the unnumbered
/// name is already taken.
#[must_use]
pub fn numbered_file_name(stem: &str, width_mm: f64, height_mm: f64, dpi: u32, index: u32) -> String {
    format!("{stem}__{width_mm:.0}x{height_mm:.0}mm_{dpi}dpi_{index}.png")
}
