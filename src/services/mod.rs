//! Detection services: debounce primitives, detectors, state codec,
//! segment reconstruction and the sharded position pipeline.

pub mod codec;
pub mod debounce;
pub mod detectors;
pub mod pipeline;
pub mod segments;

pub use debounce::{ConfidenceCounter, PresenceStreak, SurfaceStreak};
pub use detectors::EventDetector;
pub use pipeline::{create_pipeline, Pipeline};
pub use segments::{project_open_segment, reconstruct_segments};
