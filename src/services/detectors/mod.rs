//! Event detectors
//!
//! Each detector consumes one position at a time, reads and updates its own
//! cached state, and yields zero or more events. Detectors are independent:
//! a failure in one never prevents the others from running on the same
//! position. The pipeline composes them into a list and iterates.

use crate::domain::{Event, Position};
use async_trait::async_trait;

pub mod geofence;
pub mod region;
pub mod speed_camera;
pub mod surface;
pub mod toll;

pub use geofence::GeofenceDetector;
pub use region::RegionDetector;
pub use speed_camera::SpeedCameraDetector;
pub use surface::SurfaceDetector;
pub use toll::TollDetector;

#[async_trait]
pub trait EventDetector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_position(&self, position: &Position) -> Vec<Event>;
}

/// Split a comma-separated config list into trimmed lowercase entries
pub(crate) fn parse_name_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
