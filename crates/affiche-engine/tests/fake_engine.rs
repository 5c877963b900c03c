//! End-to-end runs against shell-script stand-ins for the real
//! upscaling engine. Unix-only: the scripts rely on `sh` and on the
//! executable permission bit.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use affiche_engine::{EventSender, RunError, run};
use affiche_pipeline::compose::FitPolicy;
use affiche_pipeline::paper::{PaperSize, PaperSpec};
use affiche_pipeline::plan::PlanPolicy;
use affiche_pipeline::progress::RunEvent;
use affiche_pipeline::request::{DEFAULT_MODEL, RunRequest};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A fake engine installation: executable script plus the expected
/// `models/` directory and asset files.
struct FakeEngine {
    _dir: tempfile::TempDir,
    executable: PathBuf,
    marker: PathBuf,
}

impl FakeEngine {
    /// Install `script` as the engine executable. `{marker}` in the
    /// script is replaced with a path the script can append to, so
    /// tests can count invocations.
    fn install(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let executable = dir.path().join("realesrgan-ncnn-vulkan");
        let marker = dir.path().join("invocations");

        let body = script.replace("{marker}", &marker.display().to_string());
        std::fs::write(&executable, body).unwrap();
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755)).unwrap();

        let models = dir.path().join("models");
        std::fs::create_dir(&models).unwrap();
        std::fs::write(models.join(format!("{DEFAULT_MODEL}.param")), b"param").unwrap();
        std::fs::write(models.join(format!("{DEFAULT_MODEL}.bin")), b"bin").unwrap();

        Self {
            _dir: dir,
            executable,
            marker,
        }
    }

    fn invocations(&self) -> usize {
        self.recorded().len()
    }

    /// Lines the script appended to the marker file, one per event.
    fn recorded(&self) -> Vec<String> {
        std::fs::read_to_string(&self.marker)
            .map(|s| s.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }
}

/// Script that emits progress on both streams and copies a prepared
/// artifact to the requested output path.
fn copying_script(artifact: &Path) -> String {
    format!(
        r#"#!/bin/sh
out=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
  esac
  shift
done
echo run >> "{{marker}}"
echo "25.50%"
echo "99.00%" 1>&2
cp "{}" "$out"
"#,
        artifact.display()
    )
}

/// Script that writes a black frame under half precision and a good
/// frame otherwise.
fn precision_sensitive_script(good: &Path, black: &Path) -> String {
    format!(
        r#"#!/bin/sh
out=""
fp16=0
while [ "$#" -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -x) fp16=1 ;;
  esac
  shift
done
echo run >> "{{marker}}"
if [ "$fp16" -eq 1 ]; then
  cp "{}" "$out"
else
  cp "{}" "$out"
fi
"#,
        black.display(),
        good.display()
    )
}

/// Script that records the requested scale per invocation and serves
/// `first` on the initial call, `second` afterwards. Stands in for an
/// engine whose output lands short of scale x source, forcing the
/// scheduler to re-decide from actual dimensions.
fn staged_script(first: &Path, second: &Path) -> String {
    format!(
        r#"#!/bin/sh
out=""
scale=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -s) scale="$2"; shift ;;
  esac
  shift
done
echo "$scale" >> "{{marker}}"
echo "50.00%"
if [ "$(wc -l < "{{marker}}")" -eq 1 ]; then
  cp "{}" "$out"
else
  cp "{}" "$out"
fi
"#,
        first.display(),
        second.display()
    )
}

const FAILING_SCRIPT: &str = r#"#!/bin/sh
echo run >> "{marker}"
echo "boom: device lost" 1>&2
exit 1
"#;

// Records the stop request so cooperative termination is observable.
const HANGING_SCRIPT: &str = r#"#!/bin/sh
trap 'echo stopped >> "{marker}"; exit 143' TERM
echo run >> "{marker}"
sleep 30 &
wait $!
"#;

fn write_png(dir: &Path, name: &str, width: u32, height: u32, pixel: [u8; 4]) -> PathBuf {
    let path = dir.join(name);
    image::RgbaImage::from_pixel(width, height, image::Rgba(pixel))
        .save(&path)
        .unwrap();
    path
}

/// A5 at 150 DPI: the target is 874x1240 pixels.
fn request(input: PathBuf, output_dir: PathBuf, engine: &FakeEngine) -> RunRequest {
    RunRequest {
        input,
        output_dir,
        paper: PaperSpec::Named(PaperSize::A5),
        dpi: 150,
        portrait: true,
        engine_path: engine.executable.clone(),
        model: DEFAULT_MODEL.to_owned(),
        tile_size: 256,
        half_precision: false,
        allow_high_dpi: false,
        keep_native: false,
        fit: FitPolicy::FitWithPad,
        pad_color: [0, 0, 0, 255],
        gpu_index: 0,
        plan: PlanPolicy::default(),
        scratch_root: None,
    }
}

fn channel() -> (EventSender, mpsc::UnboundedReceiver<RunEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender::new(tx), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<RunEvent>) -> (Vec<u8>, Vec<PathBuf>) {
    let mut progress = Vec::new();
    let mut previews = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            RunEvent::Progress(p) => progress.push(p),
            RunEvent::Preview(path) => previews.push(path),
        }
    }
    (progress, previews)
}

fn read_phys(path: &Path) -> (u32, u32) {
    let decoder = png::Decoder::new(std::fs::File::open(path).unwrap());
    let reader = decoder.read_info().unwrap();
    let dims = reader.info().pixel_dims.unwrap();
    assert_eq!(dims.unit, png::Unit::Meter);
    (dims.xppu, dims.yppu)
}

#[test]
fn missing_executable_fails_validation() {
    let engine = FakeEngine::install("#!/bin/sh\n");
    let result = affiche_engine::locate_engine(
        &engine.executable.with_file_name("absent"),
        DEFAULT_MODEL,
    );
    assert!(matches!(
        result,
        Err(affiche_engine::LocateError::EngineNotFound(_))
    ));
}

#[test]
fn missing_model_assets_are_named() {
    let engine = FakeEngine::install("#!/bin/sh\n");
    let err = affiche_engine::locate_engine(&engine.executable, "missing-model").unwrap_err();
    match err {
        affiche_engine::LocateError::ModelAssetsMissing { missing, .. } => {
            assert_eq!(
                missing,
                vec![
                    "missing-model.param".to_owned(),
                    "missing-model.bin".to_owned()
                ]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn high_dpi_is_rejected_without_override() {
    let engine = FakeEngine::install("#!/bin/sh\n");
    let work = tempfile::tempdir().unwrap();
    let input = write_png(work.path(), "in.png", 200, 200, [120, 60, 30, 255]);

    let mut req = request(input, work.path().join("out"), &engine);
    req.dpi = 600;

    let (mut events, _rx) = channel();
    let cancel = CancellationToken::new();
    let err = run(&req, &mut events, &cancel).await.unwrap_err();
    assert!(matches!(err, RunError::DisallowedDpi { dpi: 600 }));
    assert_eq!(engine.invocations(), 0);
}

#[tokio::test]
async fn full_run_produces_exact_tagged_poster() {
    let work = tempfile::tempdir().unwrap();
    let artifact = write_png(work.path(), "upscaled.png", 1600, 1600, [120, 60, 30, 255]);
    let engine = FakeEngine::install(&copying_script(&artifact));
    let input = write_png(work.path(), "in.png", 200, 200, [120, 60, 30, 255]);
    let scratch_root = tempfile::tempdir().unwrap();

    let mut req = request(input, work.path().join("out"), &engine);
    req.scratch_root = Some(scratch_root.path().to_path_buf());

    let (mut events, mut rx) = channel();
    let cancel = CancellationToken::new();
    let output = run(&req, &mut events, &cancel).await.unwrap();

    assert_eq!(
        output.file_name().unwrap().to_str().unwrap(),
        "in__148x210mm_150dpi.png"
    );
    let (width, height) = image::image_dimensions(&output).unwrap();
    assert_eq!((width, height), (874, 1240));
    // 150 DPI is 5906 dots per metre.
    assert_eq!(read_phys(&output), (5906, 5906));

    let (progress, previews) = drain(&mut rx);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last(), Some(&100));
    assert!(previews.contains(&output));

    // One engine pass: 200px at a 4x scale already overshoots A5.
    assert_eq!(engine.invocations(), 1);
    // The scratch workspace is gone once the run returns.
    assert_eq!(std::fs::read_dir(scratch_root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn short_first_pass_schedules_a_second_from_actual_dimensions() {
    let work = tempfile::tempdir().unwrap();
    // First pass lands at 380px: need is 1240/380 ~ 3.26, still above
    // the 4x threshold, so a second pass must be re-decided from the
    // actual output rather than the nominal 4 x 100 = 400.
    let stage1 = write_png(work.path(), "stage1.png", 380, 380, [120, 60, 30, 255]);
    let stage2 = write_png(work.path(), "stage2.png", 1600, 1600, [120, 60, 30, 255]);
    let engine = FakeEngine::install(&staged_script(&stage1, &stage2));
    let input = write_png(work.path(), "in.png", 100, 100, [120, 60, 30, 255]);

    let req = request(input, work.path().join("out"), &engine);
    let (mut events, mut rx) = channel();
    let cancel = CancellationToken::new();
    let output = run(&req, &mut events, &cancel).await.unwrap();

    assert_eq!(
        engine.recorded(),
        vec!["4".to_owned(), "4".to_owned()],
        "both passes re-decide a 4x scale"
    );
    assert_eq!(image::image_dimensions(&output).unwrap(), (874, 1240));
    assert_eq!(read_phys(&output), (5906, 5906));

    let (progress, _) = drain(&mut rx);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last(), Some(&100));
}

#[tokio::test]
async fn black_frame_retries_without_half_precision() {
    let work = tempfile::tempdir().unwrap();
    let good = write_png(work.path(), "good.png", 1600, 1600, [120, 60, 30, 255]);
    let black = write_png(work.path(), "black.png", 1600, 1600, [0, 0, 0, 255]);
    let engine = FakeEngine::install(&precision_sensitive_script(&good, &black));
    let input = write_png(work.path(), "in.png", 200, 200, [120, 60, 30, 255]);

    let mut req = request(input, work.path().join("out"), &engine);
    req.half_precision = true;

    let (mut events, _rx) = channel();
    let cancel = CancellationToken::new();
    let output = run(&req, &mut events, &cancel).await.unwrap();

    assert!(output.is_file());
    // First attempt under half precision produced a blank frame; the
    // retry dropped `-x` and succeeded.
    assert_eq!(engine.invocations(), 2);
}

#[tokio::test]
async fn persistent_failure_surfaces_engine_output() {
    let engine = FakeEngine::install(FAILING_SCRIPT);
    let work = tempfile::tempdir().unwrap();
    let input = write_png(work.path(), "in.png", 200, 200, [120, 60, 30, 255]);

    let req = request(input, work.path().join("out"), &engine);
    let (mut events, _rx) = channel();
    let cancel = CancellationToken::new();
    let err = run(&req, &mut events, &cancel).await.unwrap_err();

    match err {
        RunError::Engine(affiche_engine::PassError::Exhausted {
            attempts,
            transcript,
            ..
        }) => {
            assert_eq!(attempts, affiche_engine::MAX_ATTEMPTS);
            assert!(transcript.contains("boom: device lost"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.invocations(), affiche_engine::MAX_ATTEMPTS as usize);
}

#[tokio::test]
async fn sufficient_source_skips_the_engine() {
    let engine = FakeEngine::install(FAILING_SCRIPT);
    let work = tempfile::tempdir().unwrap();
    let input = write_png(work.path(), "in.png", 2000, 2000, [120, 60, 30, 255]);

    let mut req = request(input, work.path().join("out"), &engine);
    req.keep_native = true;

    let (mut events, mut rx) = channel();
    let cancel = CancellationToken::new();
    let output = run(&req, &mut events, &cancel).await.unwrap();

    // Native pixels preserved, only the DPI tag applied.
    assert_eq!(image::image_dimensions(&output).unwrap(), (2000, 2000));
    assert_eq!(read_phys(&output), (5906, 5906));
    assert_eq!(engine.invocations(), 0);

    let (progress, _) = drain(&mut rx);
    assert_eq!(progress.last(), Some(&100));
}

#[tokio::test]
async fn cancellation_stops_a_running_pass() {
    let engine = FakeEngine::install(HANGING_SCRIPT);
    let work = tempfile::tempdir().unwrap();
    let input = write_png(work.path(), "in.png", 200, 200, [120, 60, 30, 255]);
    let scratch_root = tempfile::tempdir().unwrap();

    let mut req = request(input, work.path().join("out"), &engine);
    req.scratch_root = Some(scratch_root.path().to_path_buf());

    let (mut events, _rx) = channel();
    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        }
    };

    let (result, ()) = tokio::join!(run(&req, &mut events, &cancel), canceller);
    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    // The engine received the stop request and exited on its own.
    assert_eq!(engine.recorded(), vec!["run".to_owned(), "stopped".to_owned()]);
    // No partial output, no leftover scratch.
    assert_eq!(std::fs::read_dir(scratch_root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn second_run_gets_a_numbered_name() {
    let work = tempfile::tempdir().unwrap();
    let artifact = write_png(work.path(), "upscaled.png", 1600, 1600, [120, 60, 30, 255]);
    let engine = FakeEngine::install(&copying_script(&artifact));
    let input = write_png(work.path(), "in.png", 200, 200, [120, 60, 30, 255]);

    let req = request(input, work.path().join("out"), &engine);
    let cancel = CancellationToken::new();

    let (mut events, _rx) = channel();
    let first = run(&req, &mut events, &cancel).await.unwrap();
    let (mut events, _rx) = channel();
    let second = run(&req, &mut events, &cancel).await.unwrap();

    assert_eq!(
        first.file_name().unwrap().to_str().unwrap(),
        "in__148x210mm_150dpi.png"
    );
    assert_eq!(
        second.file_name().unwrap().to_str().unwrap(),
        "in__148x210mm_150dpi_1.png"
    );
    assert!(first.is_file() && second.is_file());
}
