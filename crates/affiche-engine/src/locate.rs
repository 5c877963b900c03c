//! Fail-fast validation of the external engine installation.
//!
//! The engine executable and its model assets are supplied by the
//! operator, so every path is checked up front -- before any work is
//! scheduled -- and the errors name exactly what is missing. This is a
//! gate, not a retried operation: a broken installation fails the run
//! immediately.

use std::path::{Path, PathBuf};

/// Conventional name of the asset directory beside the executable.
pub const MODELS_DIR_NAME: &str = "models";

/// Extensions of the two asset files each model ships as.
const MODEL_ASSET_EXTENSIONS: [&str; 2] = ["param", "bin"];

/// Errors from engine installation validation. All are
/// configuration-class: fatal, never retried.
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    /// The engine path does not exist or is not a regular executable
    /// file.
    #[error("upscaling engine not found or not executable: {}", .0.display())]
    EngineNotFound(PathBuf),

    /// No `models/` directory beside the executable.
    #[error("models directory missing beside engine executable: {}", .0.display())]
    ModelsDirMissing(PathBuf),

    /// One or both asset files for the requested model are absent.
    #[error("model assets missing from {}: {}", .models_dir.display(), .missing.join(", "))]
    ModelAssetsMissing {
        /// The asset directory that was searched.
        models_dir: PathBuf,
        /// File names that were expected but not found.
        missing: Vec<String>,
    },
}

/// An engine installation that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedEngine {
    /// The engine executable.
    pub executable: PathBuf,
    /// The directory containing the executable; used as the
    /// subprocess working directory.
    pub directory: PathBuf,
    /// The validated asset directory, passed to the engine explicitly
    /// so it never falls back to its own search path.
    pub models_dir: PathBuf,
}

/// Validate the engine executable and the assets for `model`.
///
/// # Errors
///
/// Returns [`LocateError::EngineNotFound`] when the executable is
/// absent or not executable, [`LocateError::ModelsDirMissing`] when no
/// asset directory sits beside it, and
/// [`LocateError::ModelAssetsMissing`] naming each absent asset file.
pub fn locate_engine(executable: &Path, model: &str) -> Result<ValidatedEngine, LocateError> {
    let not_found = || LocateError::EngineNotFound(executable.to_path_buf());

    let meta = std::fs::metadata(executable).map_err(|_| not_found())?;
    if !meta.is_file() || !is_executable(&meta) {
        return Err(not_found());
    }
    let directory = executable.parent().ok_or_else(not_found)?.to_path_buf();

    let models_dir = directory.join(MODELS_DIR_NAME);
    if !models_dir.is_dir() {
        return Err(LocateError::ModelsDirMissing(models_dir));
    }

    let missing: Vec<String> = MODEL_ASSET_EXTENSIONS
        .iter()
        .map(|ext| format!("{model}.{ext}"))
        .filter(|name| !models_dir.join(name).is_file())
        .collect();
    if !missing.is_empty() {
        return Err(LocateError::ModelAssetsMissing {
            models_dir,
            missing,
        });
    }

    Ok(ValidatedEngine {
        executable: executable.to_path_buf(),
        directory,
        models_dir,
    })
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
#[allow(clippy::missing_const_for_fn)]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}
