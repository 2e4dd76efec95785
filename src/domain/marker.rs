//! Geofence distance markers and derived segments
//!
//! A `DistanceMarker` is the raw append-only record written by the geofence
//! detector at every inside/outside transition. A `DistanceSegment` is the
//! derived inside/outside interval reconstructed from a marker sequence.

use crate::domain::position::{DeviceId, GeofenceId, PositionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerType {
    Enter,
    Exit,
}

/// Raw enter/exit odometer marker, one per geofence transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceMarker {
    pub device_id: DeviceId,
    pub geofence_id: GeofenceId,
    /// Sequencing key: strictly increasing per device
    pub position_id: PositionId,
    #[serde(rename = "type")]
    pub marker_type: MarkerType,
    /// Odometer reading at the moment of the transition, meters
    pub total_distance: f64,
    pub fix_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    Inside,
    Outside,
}

/// Derived inside/outside interval for one device and geofence
///
/// A segment is `open` when no closing marker has arrived yet; open segments
/// have no exit fields and no distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceSegment {
    pub device_id: DeviceId,
    pub geofence_id: GeofenceId,
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
    pub enter_position_id: PositionId,
    pub exit_position_id: Option<PositionId>,
    pub enter_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub odo_start: f64,
    pub odo_end: Option<f64>,
    pub distance: Option<f64>,
    pub open: bool,
}
