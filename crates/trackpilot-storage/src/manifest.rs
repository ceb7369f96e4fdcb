//! Track manifests: a JSON description of the track plus where its road comes from.
//!
//! Road either comes from a bitmap (dark pixels are road, matching the drawing tool's paint)
//! or from recorded brush strokes that are replayed onto an empty grid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;
use trackpilot_core::{Position, StartPose, Track};

use crate::StorageError;

/// Pixels with luma at or below this are road.
pub const DEFAULT_ROAD_THRESHOLD: u8 = 127;
/// Round brush radius used by the drawing tool.
pub const DEFAULT_BRUSH_RADIUS: f32 = 50.0;

fn default_threshold() -> u8 {
    DEFAULT_ROAD_THRESHOLD
}

fn default_brush_radius() -> f32 {
    DEFAULT_BRUSH_RADIUS
}

/// Origin of a manifest's drivable cells.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackSource {
    Bitmap {
        /// Image path, relative to the manifest's directory unless absolute.
        path: PathBuf,
        #[serde(default = "default_threshold")]
        threshold: u8,
    },
    Strokes {
        strokes: Vec<Vec<Position>>,
        #[serde(default = "default_brush_radius")]
        brush_radius: f32,
    },
}

/// On-disk description of a track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackManifest {
    pub width: u32,
    pub height: u32,
    /// Explicit start pose. Stroke tracks derive one from the first stroke when omitted.
    #[serde(default)]
    pub start: Option<StartPose>,
    #[serde(default)]
    pub goal: Option<Position>,
    pub source: TrackSource,
}

impl TrackManifest {
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let bytes = std::fs::read(path).map_err(|err| StorageError::io(path, err))?;
        serde_json::from_slice(&bytes).map_err(|err| StorageError::json(path, err))
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        crate::ensure_parent(path)?;
        let json =
            serde_json::to_vec_pretty(self).map_err(|err| StorageError::json(path, err))?;
        std::fs::write(path, json).map_err(|err| StorageError::io(path, err))
    }

    /// Load a manifest and build its track. Relative bitmap paths resolve against the
    /// manifest's directory.
    pub fn load_track(path: &Path) -> Result<Track, StorageError> {
        let manifest = Self::load(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let track = manifest.build(base)?;
        info!(
            manifest = %path.display(),
            width = track.width(),
            height = track.height(),
            has_goal = track.goal().is_some(),
            "loaded track",
        );
        Ok(track)
    }

    /// Rasterize the manifest into a [`Track`].
    pub fn build(&self, base_dir: &Path) -> Result<Track, StorageError> {
        if self.width == 0 || self.height == 0 {
            return Err(StorageError::Manifest("width and height must be non-zero"));
        }
        match &self.source {
            TrackSource::Bitmap { path, threshold } => {
                let start = self
                    .start
                    .ok_or(StorageError::Manifest("bitmap tracks need an explicit start"))?;
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    base_dir.join(path)
                };
                let cells = self.read_bitmap(&path, *threshold)?;
                Ok(Track::from_cells(
                    self.width,
                    self.height,
                    cells,
                    start,
                    self.goal,
                )?)
            }
            TrackSource::Strokes {
                strokes,
                brush_radius,
            } => {
                if !(brush_radius.is_finite() && *brush_radius > 0.0) {
                    return Err(StorageError::Manifest("brush_radius must be positive"));
                }
                let start = match self.start {
                    Some(start) => start,
                    None => strokes
                        .iter()
                        .find_map(|stroke| Track::start_from_stroke(stroke))
                        .ok_or(StorageError::Manifest(
                            "stroke tracks need a start or at least one stroke point",
                        ))?,
                };
                let mut track = Track::unpainted(self.width, self.height, start, self.goal)?;
                for stroke in strokes {
                    track.paint_stroke(stroke, *brush_radius);
                }
                Ok(track)
            }
        }
    }

    fn read_bitmap(&self, path: &Path, threshold: u8) -> Result<Vec<bool>, StorageError> {
        let image = image::open(path)
            .map_err(|source| StorageError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .to_luma8();
        let (actual_width, actual_height) = image.dimensions();
        if (actual_width, actual_height) != (self.width, self.height) {
            return Err(StorageError::SizeMismatch {
                width: self.width,
                height: self.height,
                actual_width,
                actual_height,
            });
        }
        Ok(image.pixels().map(|pixel| pixel.0[0] <= threshold).collect())
    }
}
