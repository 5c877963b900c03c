//! The per-run orchestrator: validation, early exit, the pass loop,
//! and final compositing, with a private scratch workspace that is
//! destroyed on every exit path.
//!
//! One run walks `Validating -> EarlyExitCheck -> (Passing)* ->
//! Compositing -> TaggingDPI -> Done`; failure is terminal from any
//! state, cancellation only from the pass loop. Each run owns all of
//! its state (current dimensions, progress high-water mark, scratch
//! paths), so callers may execute independent runs concurrently.

use std::path::{Path, PathBuf};

use affiche_pipeline::attempt::AttemptParams;
use affiche_pipeline::compose::{compose, write_png_with_dpi};
use affiche_pipeline::error::{ComposeError, PaperError};
use affiche_pipeline::geometry::Dimensions;
use affiche_pipeline::naming::{numbered_file_name, output_file_name};
use affiche_pipeline::plan::{BASE_PROGRESS, COMPOSE_WINDOW, MAX_PASSES, plan_passes, window_for_pass};
use affiche_pipeline::request::{RESTRICTED_DPI, RunRequest};
use tokio_util::sync::CancellationToken;

use crate::events::EventSender;
use crate::invoke::{PassError, run_pass};
use crate::locate::{LocateError, locate_engine};

/// Terminal outcome of a failed or cancelled run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// DPI at or above the guarded threshold without the override.
    #[error(
        "{dpi} DPI output is disabled for safety; enable the high-DPI override to allow it"
    )]
    DisallowedDpi {
        /// The rejected DPI value.
        dpi: u32,
    },

    /// Invalid paper specification.
    #[error(transparent)]
    Paper(#[from] PaperError),

    /// Engine installation failed validation.
    #[error(transparent)]
    Locate(#[from] LocateError),

    /// The source image could not be read.
    #[error("failed to read source image {}: {source}", .path.display())]
    SourceUnreadable {
        /// The offending path.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: image::ImageError,
    },

    /// An engine pass failed after exhausting its retries.
    #[error(transparent)]
    Engine(PassError),

    /// The run was cancelled. A first-class terminal outcome, not a
    /// failure.
    #[error("run cancelled")]
    Cancelled,

    /// Final compositing or encoding failed.
    #[error(transparent)]
    Compose(#[from] ComposeError),

    /// Filesystem failure (output directory, final rename, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PassError> for RunError {
    fn from(err: PassError) -> Self {
        match err {
            PassError::Cancelled => Self::Cancelled,
            other => Self::Engine(other),
        }
    }
}

impl RunError {
    /// Whether this outcome is cancellation rather than failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Execute one poster run to completion.
///
/// Emits monotonic progress and advisory previews into `events`,
/// honours `cancel` at every blocking point inside the pass loop, and
/// returns the final output path. The final artifact only ever appears
/// at its destination complete: it is written to a `.part` sibling and
/// renamed into place.
///
/// # Errors
///
/// See [`RunError`]; configuration errors fail fast, engine failures
/// surface only after the invoker's retries are exhausted, and
/// [`RunError::Cancelled`] reports cancellation.
pub async fn run(
    request: &RunRequest,
    events: &mut EventSender,
    cancel: &CancellationToken,
) -> Result<PathBuf, RunError> {
    // --- Validating ---
    if request.dpi >= RESTRICTED_DPI && !request.allow_high_dpi {
        return Err(RunError::DisallowedDpi { dpi: request.dpi });
    }
    let engine = locate_engine(&request.engine_path, &request.model)?;
    let (width_mm, height_mm) = request.paper.dimensions_mm()?;
    let target = request.target_pixels()?;

    tokio::fs::create_dir_all(&request.output_dir).await?;

    let (source_w, source_h) =
        image::image_dimensions(&request.input).map_err(|source| RunError::SourceUnreadable {
            path: request.input.clone(),
            source,
        })?;
    let source = Dimensions {
        width: source_w,
        height: source_h,
    };
    tracing::info!(%source, %target, dpi = request.dpi, "resolved poster geometry");

    let stem = request
        .input
        .file_stem()
        .map_or_else(|| "poster".to_owned(), |s| s.to_string_lossy().into_owned());
    let final_path = unique_output_path(&request.output_dir, &stem, width_mm, height_mm, request.dpi);

    // --- EarlyExitCheck ---
    if request.keep_native && source.covers(target) {
        tracing::info!("source already meets target size; keeping native pixels");
        let img = decode(&request.input)?;
        finalize(&img.to_rgba8(), &final_path, request.dpi)?;
        events.preview(&final_path);
        events.progress(100);
        return Ok(final_path);
    }

    // Scratch workspace: exclusively owned by this run, destroyed on
    // every exit path when the guard drops.
    let mut scratch_builder = tempfile::Builder::new();
    scratch_builder.prefix("affiche-");
    let scratch = match &request.scratch_root {
        Some(root) => scratch_builder.tempdir_in(root)?,
        None => scratch_builder.tempdir()?,
    };

    events.progress(BASE_PROGRESS);

    let plan = plan_passes(source, target, &request.plan);
    tracing::info!(passes = plan.len(), "planned upscale passes");

    let params = AttemptParams::new(request.tile_size, request.half_precision);
    if params.tile_size != request.tile_size {
        tracing::warn!(
            requested = request.tile_size,
            clamped = params.tile_size,
            "tile size clamped to safe range",
        );
    }

    // --- Passing ---
    let mut current_path = request.input.clone();
    let mut current = source;
    let mut pass_index = 0;
    while pass_index < MAX_PASSES {
        let Some(scale) = request.plan.next_scale(current, target) else {
            break;
        };
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let artifact = scratch.path().join(format!("pass{}.png", pass_index + 1));
        tracing::info!(pass = pass_index + 1, scale, "running upscale pass");
        current = run_pass(
            &engine,
            &request.model,
            &current_path,
            &artifact,
            scale,
            params,
            request.gpu_index,
            window_for_pass(pass_index),
            events,
            cancel,
        )
        .await?;
        current_path = artifact;
        pass_index += 1;
    }

    // --- Compositing + TaggingDPI ---
    tracing::info!(%current, %target, "compositing to exact target canvas");
    let upscaled = decode(&current_path)?;
    let composed = compose(&upscaled, target, request.fit, request.pad_color);
    finalize(&composed, &final_path, request.dpi)?;

    events.preview(&final_path);
    events.progress(COMPOSE_WINDOW.end());
    tracing::info!(output = %final_path.display(), "poster run complete");
    Ok(final_path)
}

/// First free output path for this run's deterministic name.
fn unique_output_path(
    dir: &Path,
    stem: &str,
    width_mm: f64,
    height_mm: f64,
    dpi: u32,
) -> PathBuf {
    let mut path = dir.join(output_file_name(stem, width_mm, height_mm, dpi));
    let mut index = 1;
    while path.exists() {
        path = dir.join(numbered_file_name(stem, width_mm, height_mm, dpi, index));
        index += 1;
    }
    path
}

fn decode(path: &Path) -> Result<image::DynamicImage, RunError> {
    image::open(path).map_err(|source| RunError::SourceUnreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the DPI-tagged output via a `.part` sibling and atomic
/// rename, so a failed run never leaves a partial file at the final
/// path.
fn finalize(image: &image::RgbaImage, final_path: &Path, dpi: u32) -> Result<(), RunError> {
    let part = final_path.with_extension("part");
    if let Err(err) = write_png_with_dpi(image, &part, dpi) {
        let _ = std::fs::remove_file(&part);
        return Err(err.into());
    }
    if let Err(err) = std::fs::rename(&part, final_path) {
        let _ = std::fs::remove_file(&part);
        return Err(err.into());
    }
    Ok(())
}
