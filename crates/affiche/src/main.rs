//! affiche: print-ready posters from ordinary raster images.
//!
//! Drives an external super-resolution engine
//! (realesrgan-ncnn-vulkan or compatible) through one or more upscale
//! passes, then composites to the exact pixel size of the requested
//! paper at the requested DPI and tags the PNG so print software
//! reports the physical size without manual scaling.
//!
//! # Usage
//!
//! ```text
//! affiche --engine /opt/realesrgan/realesrgan-ncnn-vulkan \
//!     --paper a1 --dpi 300 photo.png
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use affiche_engine::EventSender;
use affiche_pipeline::compose::FitPolicy;
use affiche_pipeline::paper::{PaperSize, PaperSpec};
use affiche_pipeline::plan::PlanPolicy;
use affiche_pipeline::progress::RunEvent;
use affiche_pipeline::request::{DEFAULT_MODEL, RunRequest};
use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exact-size, DPI-tagged poster rendering via an external
/// super-resolution engine.
#[derive(Parser)]
#[command(name = "affiche", version)]
struct Cli {
    /// Source images to render, processed in order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory finished posters are written into.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Named paper size (a0-a5). Ignored when --width-mm is given.
    #[arg(long, default_value = "a1")]
    paper: PaperSize,

    /// Custom paper width in millimetres. Requires --height-mm.
    #[arg(long, requires = "height_mm")]
    width_mm: Option<f64>,

    /// Custom paper height in millimetres. Requires --width-mm.
    #[arg(long, requires = "width_mm")]
    height_mm: Option<f64>,

    /// Print resolution; also written into the output's DPI tag.
    #[arg(long, default_value_t = 300)]
    dpi: u32,

    /// Landscape orientation (swap the target pixel pair).
    #[arg(long)]
    landscape: bool,

    /// Path to the upscaling engine executable. Its models directory
    /// must sit beside it.
    #[arg(long)]
    engine: PathBuf,

    /// Model name; <model>.param and <model>.bin must exist in the
    /// engine's models directory.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Engine tile size hint (clamped to a safe range).
    #[arg(long, default_value_t = 256)]
    tile_size: u32,

    /// Request half-precision inference. Automatically disabled on
    /// retry if the device produces blank frames.
    #[arg(long)]
    fp16: bool,

    /// Allow DPI values of 600 and above.
    #[arg(long)]
    allow_high_dpi: bool,

    /// Skip upscaling entirely when the source already meets the
    /// target size; only the DPI tag is applied.
    #[arg(long)]
    keep_native: bool,

    /// How the upscaled image is placed on the exact-size canvas.
    #[arg(long, value_enum, default_value_t = Fit::Pad)]
    fit: Fit,

    /// Padding colour as RRGGBB hex, used with --fit pad.
    #[arg(long, default_value = "000000", value_parser = parse_pad_color)]
    pad_color: [u8; 4],

    /// GPU device index passed to the engine.
    #[arg(long, default_value_t = 0)]
    gpu: u32,

    /// Parent directory for per-run scratch workspaces (system temp
    /// directory by default).
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Abort the batch at the first failed input instead of
    /// continuing.
    #[arg(long)]
    stop_on_first_error: bool,
}

/// Canvas placement policy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Fit {
    /// Preserve aspect ratio, centre, pad the remainder.
    Pad,
    /// Preserve aspect ratio, fill the canvas, crop the overflow.
    Cover,
    /// Distort to the exact canvas size.
    Stretch,
}

impl From<Fit> for FitPolicy {
    fn from(fit: Fit) -> Self {
        match fit {
            Fit::Pad => Self::FitWithPad,
            Fit::Cover => Self::Cover,
            Fit::Stretch => Self::Stretch,
        }
    }
}

/// Parse an RRGGBB hex string into an opaque RGBA colour.
fn parse_pad_color(value: &str) -> Result<[u8; 4], String> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("expected RRGGBB hex colour, got {value:?}"));
    }
    let channel = |range| u8::from_str_radix(&hex[range], 16).map_err(|e| e.to_string());
    Ok([channel(0..2)?, channel(2..4)?, channel(4..6)?, 255])
}

/// Build the per-input request template from CLI arguments.
fn request_from_cli(cli: &Cli, input: PathBuf) -> RunRequest {
    let paper = match (cli.width_mm, cli.height_mm) {
        (Some(width_mm), Some(height_mm)) => PaperSpec::Custom {
            width_mm,
            height_mm,
        },
        _ => PaperSpec::Named(cli.paper),
    };
    RunRequest {
        input,
        output_dir: cli.output_dir.clone(),
        paper,
        dpi: cli.dpi,
        portrait: !cli.landscape,
        engine_path: cli.engine.clone(),
        model: cli.model.clone(),
        tile_size: cli.tile_size,
        half_precision: cli.fp16,
        allow_high_dpi: cli.allow_high_dpi,
        keep_native: cli.keep_native,
        fit: cli.fit.into(),
        pad_color: cli.pad_color,
        gpu_index: cli.gpu,
        plan: PlanPolicy::default(),
        scratch_root: cli.scratch_dir.clone(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("affiche=info,affiche_engine=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ninterrupted, stopping after cleanup...");
                cancel.cancel();
            }
        });
    }

    let mut failures = 0_usize;
    for input in cli.inputs.clone() {
        if cancel.is_cancelled() {
            break;
        }

        let label = input.display().to_string();
        let request = request_from_cli(&cli, input);

        let (tx, rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_events(label.clone(), rx));
        let mut events = EventSender::new(tx);

        let result = affiche_engine::run(&request, &mut events, &cancel).await;
        drop(events);
        let _ = printer.await;

        match result {
            Ok(path) => println!("{label} -> {}", path.display()),
            Err(err) if err.is_cancelled() => {
                eprintln!("{label}: cancelled");
                failures += 1;
                break;
            }
            Err(err) => {
                eprintln!("{label}: {err}");
                failures += 1;
                if cli.stop_on_first_error {
                    break;
                }
            }
        }
    }

    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Render one run's event stream to stderr until the sender drops.
async fn print_events(label: String, mut rx: mpsc::UnboundedReceiver<RunEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::Progress(percent) => eprintln!("{label}: {percent}%"),
            RunEvent::Preview(path) => {
                tracing::debug!(preview = %path.display(), "preview artifact available");
            }
        }
    }
}
