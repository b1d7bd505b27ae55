//! rollcall-hw — camera abstraction for the attendance kiosk.
//!
//! Frames arrive as snapshot files from an external capture tool and are
//! screened for readiness (missing, stale or still-dark frames).

pub mod camera;
pub mod frame;

pub use camera::{CameraError, CameraSource, SnapshotCamera};
pub use frame::Frame;
