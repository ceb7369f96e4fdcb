//! Versioned policy artifacts written as pretty JSON.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::StorageError;

/// Current artifact layout version.
pub const ARTIFACT_VERSION: u32 = 1;

/// A trained policy plus the metadata needed to run it against the same sensor layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyArtifact<T> {
    pub version: u32,
    /// Brain family identifier, e.g. `mlp.dense`.
    pub kind: String,
    /// Fitness (evolution) or best episode reward (replay training) at save time.
    pub fitness: Option<f32>,
    pub observation_len: usize,
    pub payload: T,
}

impl<T> PolicyArtifact<T> {
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        fitness: Option<f32>,
        observation_len: usize,
        payload: T,
    ) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            kind: kind.into(),
            fitness,
            observation_len,
            payload,
        }
    }
}

impl<T: Serialize> PolicyArtifact<T> {
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        crate::ensure_parent(path)?;
        let file = File::create(path).map_err(|err| StorageError::io(path, err))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|err| StorageError::json(path, err))?;
        writer.flush().map_err(|err| StorageError::io(path, err))?;
        info!(
            path = %path.display(),
            kind = %self.kind,
            fitness = ?self.fitness,
            "saved policy artifact",
        );
        Ok(())
    }
}

impl<T: DeserializeOwned> PolicyArtifact<T> {
    /// Load an artifact, rejecting other layout versions and other brain families.
    pub fn load(path: &Path, expected_kind: &str) -> Result<Self, StorageError> {
        let file = File::open(path).map_err(|err| StorageError::io(path, err))?;
        let artifact: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| StorageError::json(path, err))?;
        if artifact.version != ARTIFACT_VERSION {
            return Err(StorageError::UnsupportedVersion {
                found: artifact.version,
                supported: ARTIFACT_VERSION,
            });
        }
        if artifact.kind != expected_kind {
            return Err(StorageError::KindMismatch {
                expected: expected_kind.to_string(),
                found: artifact.kind,
            });
        }
        Ok(artifact)
    }
}

/// Read only the `kind` field, so callers can dispatch before choosing a payload type.
pub fn peek_kind(path: &Path) -> Result<String, StorageError> {
    #[derive(Deserialize)]
    struct Header {
        kind: String,
    }
    let file = File::open(path).map_err(|err| StorageError::io(path, err))?;
    let header: Header = serde_json::from_reader(BufReader::new(file))
        .map_err(|err| StorageError::json(path, err))?;
    Ok(header.kind)
}
