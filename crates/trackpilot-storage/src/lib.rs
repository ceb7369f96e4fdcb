//! File-backed persistence for TrackPilot: track manifests, policy artifacts and training logs.

use std::path::{Path, PathBuf};

use thiserror::Error;
use trackpilot_core::SimulationError;

pub mod artifact;
pub mod log;
pub mod manifest;

pub use artifact::{ARTIFACT_VERSION, PolicyArtifact, peek_kind};
pub use log::{LogRecord, TrainingLog, TrainingLogPipeline};
pub use manifest::{DEFAULT_BRUSH_RADIUS, DEFAULT_ROAD_THRESHOLD, TrackManifest, TrackSource};

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("bitmap is {actual_width}x{actual_height} but the manifest declares {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("invalid track manifest: {0}")]
    Manifest(&'static str),
    #[error("artifact version {found} is not supported (expected {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("artifact holds a {found} policy, expected {expected}")]
    KindMismatch { expected: String, found: String },
    #[error("training log worker error: {0}")]
    Worker(String),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Create the parent directory of `path` if it is missing.
pub(crate) fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|err| StorageError::io(parent, err))
        }
        _ => Ok(()),
    }
}
