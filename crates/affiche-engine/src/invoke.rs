//! One upscaling pass: subprocess invocation, streamed progress,
//! artifact validation, and bounded retry with parameter relaxation.
//!
//! The engine is an untrusted external process: it can exit non-zero,
//! exit zero without writing output, or write a corrupt or uniformly
//! black frame (a known failure mode of some device/precision
//! combinations). Every artifact is therefore validated before it is
//! allowed to feed the next stage, and failures are retried with
//! progressively relaxed parameters before the pass is declared dead.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use affiche_pipeline::attempt::AttemptParams;
use affiche_pipeline::compose::is_blank;
use affiche_pipeline::geometry::Dimensions;
use affiche_pipeline::progress::{ProgressWindow, parse_percent};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::EventSender;
use crate::locate::ValidatedEngine;

/// Total invocation attempts per pass, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay between attempts, giving a wedged device a moment to recover.
const RETRY_DELAY: Duration = Duration::from_millis(750);

/// How long a cancelled engine process gets to exit on its own before
/// it is killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on captured engine output kept for diagnostics.
const MAX_TRANSCRIPT_BYTES: usize = 256 * 1024;

/// Terminal failure of one pass.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    /// The run was cancelled while this pass was executing.
    #[error("pass cancelled")]
    Cancelled,

    /// The engine process could not be started at all.
    #[error("failed to launch upscaling engine: {0}")]
    Spawn(#[source] std::io::Error),

    /// Every attempt failed; carries the captured engine output for
    /// operator diagnosis.
    #[error(
        "engine failed after {attempts} attempt(s): {reason}\ncaptured engine output:\n{transcript}"
    )]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last attempt's failure, rendered.
        reason: String,
        /// Combined stdout/stderr captured across all attempts.
        transcript: String,
    },

    /// Filesystem error around the pass (stale-output removal, etc.).
    #[error("I/O error during engine pass: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single attempt was rejected. Transient: retried with relaxed
/// parameters until [`MAX_ATTEMPTS`] is reached.
#[derive(Debug, thiserror::Error)]
enum AttemptFailure {
    #[error("engine exited with {0}")]
    NonZeroExit(std::process::ExitStatus),

    #[error("engine reported success but wrote no output file")]
    OutputMissing,

    #[error("engine output file is empty")]
    OutputEmpty,

    #[error("engine output is not a decodable image: {0}")]
    Undecodable(image::ImageError),

    #[error("engine output is uniformly blank")]
    Blank,
}

/// Run one upscaling pass from `input` to `output`.
///
/// Streams engine progress into `events` mapped onto `window`, emits
/// the artifact preview on success, and returns the validated output
/// dimensions.
///
/// # Errors
///
/// Returns [`PassError::Cancelled`] when `cancel` fires,
/// [`PassError::Exhausted`] after [`MAX_ATTEMPTS`] failed attempts,
/// and [`PassError::Spawn`]/[`PassError::Io`] for environment-level
/// failures that retrying cannot fix.
#[allow(clippy::too_many_arguments)]
pub async fn run_pass(
    engine: &ValidatedEngine,
    model: &str,
    input: &Path,
    output: &Path,
    scale: u32,
    params: AttemptParams,
    gpu_index: u32,
    window: ProgressWindow,
    events: &mut EventSender,
    cancel: &CancellationToken,
) -> Result<Dimensions, PassError> {
    let mut params = params;
    let mut transcript = String::new();
    let mut last_failure: Option<AttemptFailure> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        tracing::info!(
            attempt,
            scale,
            tile_size = params.tile_size,
            half_precision = params.half_precision,
            "invoking upscaling engine",
        );

        let outcome = run_attempt(
            engine, model, input, output, scale, params, gpu_index, window, events, cancel,
            &mut transcript,
        )
        .await?;

        match outcome {
            Ok(dims) => {
                events.progress(window.end());
                events.preview(output);
                tracing::info!(attempt, output_w = dims.width, output_h = dims.height, "pass complete");
                return Ok(dims);
            }
            Err(failure) => {
                tracing::warn!(attempt, error = %failure, "engine pass attempt failed");
                last_failure = Some(failure);
            }
        }

        if attempt < MAX_ATTEMPTS {
            params = params.relaxed();
            tokio::select! {
                () = cancel.cancelled() => return Err(PassError::Cancelled),
                () = tokio::time::sleep(RETRY_DELAY) => {}
            }
        }
    }

    Err(PassError::Exhausted {
        attempts: MAX_ATTEMPTS,
        reason: last_failure.map_or_else(|| "unknown failure".to_owned(), |f| f.to_string()),
        transcript,
    })
}

/// One engine invocation: spawn, pump output, wait, validate.
///
/// The outer `Result` is for failures that end the whole pass
/// (cancellation, spawn, I/O); the inner one distinguishes a validated
/// artifact from a transient failure the caller may retry.
#[allow(clippy::too_many_arguments)]
async fn run_attempt(
    engine: &ValidatedEngine,
    model: &str,
    input: &Path,
    output: &Path,
    scale: u32,
    params: AttemptParams,
    gpu_index: u32,
    window: ProgressWindow,
    events: &mut EventSender,
    cancel: &CancellationToken,
    transcript: &mut String,
) -> Result<Result<Dimensions, AttemptFailure>, PassError> {
    // The engine must never silently reuse prior output.
    match tokio::fs::remove_file(output).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut cmd = Command::new(&engine.executable);
    cmd.arg("-i")
        .arg(input)
        .arg("-o")
        .arg(output)
        .arg("-n")
        .arg(model)
        .arg("-s")
        .arg(scale.to_string())
        .arg("-t")
        .arg(params.tile_size.to_string())
        .arg("-f")
        .arg("png")
        .arg("-g")
        .arg(gpu_index.to_string())
        .arg("-m")
        .arg(&engine.models_dir);
    if params.half_precision {
        cmd.arg("-x");
    }
    cmd.current_dir(&engine.directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(PassError::Spawn)?;

    // Pump both streams into one line channel so progress markers are
    // seen no matter which stream the engine writes them to.
    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_lines(stderr, line_tx.clone()));
    }
    drop(line_tx);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                terminate(child).await;
                return Err(PassError::Cancelled);
            }
            line = line_rx.recv() => match line {
                Some(line) => {
                    append_transcript(transcript, &line);
                    if let Some(percent) = parse_percent(&line) {
                        events.progress(window.map(percent));
                    }
                }
                None => break,
            }
        }
    }

    let status = tokio::select! {
        () = cancel.cancelled() => {
            terminate(child).await;
            return Err(PassError::Cancelled);
        }
        status = child.wait() => status?,
    };

    if !status.success() {
        return Ok(Err(AttemptFailure::NonZeroExit(status)));
    }
    Ok(validate_artifact(output))
}

/// Forward a child stream into the line channel until either side
/// closes.
async fn pump_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

/// Ask a cancelled child to stop, give it a short grace period to
/// exit on its own, then kill it.
async fn terminate(mut child: Child) {
    request_stop(&child);
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        if let Err(e) = child.start_kill() {
            tracing::warn!(error = %e, "failed to kill engine subprocess");
        }
        let _ = child.wait().await;
    }
}

/// Deliver a cooperative stop request (SIGTERM) so the engine can
/// release the device before the hard kill.
#[cfg(unix)]
fn request_stop(child: &Child) {
    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    // Safety: kill with a live child pid and a valid signal number has
    // no memory effects.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        tracing::warn!(pid, "failed to signal engine subprocess");
    }
}

#[cfg(not(unix))]
#[allow(clippy::missing_const_for_fn)]
fn request_stop(_child: &Child) {}

/// Append a line to the diagnostic transcript, bounded so a verbose
/// engine cannot exhaust memory.
fn append_transcript(transcript: &mut String, line: &str) {
    if transcript.len() >= MAX_TRANSCRIPT_BYTES {
        return;
    }
    transcript.push_str(line);
    transcript.push('\n');
}

/// Decide whether the engine's output artifact is usable.
///
/// Existence, non-zero size, decodability, positive dimensions, and
/// non-blank content are all required; anything less is a transient
/// failure.
fn validate_artifact(path: &Path) -> Result<Dimensions, AttemptFailure> {
    let Ok(meta) = std::fs::metadata(path) else {
        return Err(AttemptFailure::OutputMissing);
    };
    if meta.len() == 0 {
        return Err(AttemptFailure::OutputEmpty);
    }

    let img = image::open(path).map_err(AttemptFailure::Undecodable)?;
    let dims = Dimensions {
        width: img.width(),
        height: img.height(),
    };
    if dims.width == 0 || dims.height == 0 {
        return Err(AttemptFailure::OutputEmpty);
    }
    if is_blank(&img.to_rgba8()) {
        return Err(AttemptFailure::Blank);
    }
    Ok(dims)
}
