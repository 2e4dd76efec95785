//! Domain models - core telemetry types
//!
//! This module contains the canonical data types used throughout the engine:
//! - `Position` - one normalized telemetry sample
//! - `Event` - a detected higher-level event
//! - `DistanceMarker` / `DistanceSegment` - geofence distance records
//! - reference data (devices, groups, geofences, calendars)

pub mod event;
pub mod marker;
pub mod position;
pub mod refdata;

// Re-export commonly used types at module level
pub use event::{Event, EventType};
pub use marker::{DistanceMarker, DistanceSegment, MarkerType, SegmentType};
pub use position::{DeviceId, GeofenceId, Position, PositionId};
