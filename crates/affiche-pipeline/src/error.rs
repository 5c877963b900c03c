//! Error types shared across the pure pipeline core.

/// Errors in paper-size resolution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PaperError {
    /// A named paper size was not found in the lookup table.
    #[error("unsupported paper size \"{0}\" (expected one of a0..a5)")]
    Unsupported(String),

    /// Explicit millimetre dimensions were zero or negative.
    #[error("paper dimensions must be positive, got {width_mm}x{height_mm} mm")]
    InvalidDimensions {
        /// Requested width in millimetres.
        width_mm: f64,
        /// Requested height in millimetres.
        height_mm: f64,
    },
}

/// Errors during final compositing and PNG/DPI encoding.
///
/// Decode failures never originate here: compositing operates on
/// already-decoded images, and the orchestrator reports unreadable
/// files with the offending path attached.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// PNG encoding failed.
    #[error("PNG encoding failed: {0}")]
    PngEncode(#[from] png::EncodingError),

    /// Filesystem error while writing the output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
