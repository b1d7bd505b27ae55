//! Camera sources.
//!
//! The kiosk does not drive the webcam itself: an external capture tool keeps
//! writing the latest frame to a snapshot file, which [`SnapshotCamera`] decodes.

use crate::frame::{self, Frame};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("failed to decode snapshot {path}: {source}")]
    DecodeFailed {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Supplies live frames on demand.
pub trait CameraSource {
    /// Returns `Ok(None)` while the camera has no usable frame yet.
    fn get_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

/// Reads the most recent still image written by an external capture tool.
pub struct SnapshotCamera {
    path: PathBuf,
    /// Snapshots older than this are stale (capture tool stopped).
    max_age: Option<Duration>,
    sequence: u32,
}

impl SnapshotCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: None,
            sequence: 0,
        }
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_stale(&self, modified: SystemTime) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        // Clock skew (modified in the future) counts as fresh.
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > max_age)
            .unwrap_or(false)
    }
}

impl CameraSource for SnapshotCamera {
    fn get_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "snapshot not written yet");
                return Ok(None);
            }
            Err(e) => {
                return Err(CameraError::CaptureFailed(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };

        if meta.len() == 0 {
            tracing::debug!(path = %self.path.display(), "snapshot is empty");
            return Ok(None);
        }
        if let Ok(modified) = meta.modified() {
            if self.is_stale(modified) {
                tracing::debug!(path = %self.path.display(), "snapshot is stale");
                return Ok(None);
            }
        }

        let image = image::open(&self.path).map_err(|source| CameraError::DecodeFailed {
            path: self.path.display().to_string(),
            source,
        })?;
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Ok(None);
        }

        let data = rgb.into_raw();
        let luma = frame::rgb_to_luma(&data);
        self.sequence = self.sequence.wrapping_add(1);

        if frame::is_dark_frame(&luma, frame::DARK_FRAME_THRESHOLD) {
            tracing::debug!(seq = self.sequence, "skipping dark frame");
            return Ok(None);
        }

        tracing::debug!(seq = self.sequence, width, height, "snapshot captured");
        Ok(Some(Frame {
            data,
            width,
            height,
            sequence: self.sequence,
        }))
    }
}
