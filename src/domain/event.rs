//! Detected event model
//!
//! Events are the output of the detectors: a typed record carrying the
//! triggering device, an optional geofence, the fix time, and an attribute
//! bag mirroring the relevant position fields.

use crate::domain::position::{DeviceId, GeofenceId, Position};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    GeofenceEnter,
    GeofenceExit,
    CustomToll,
    TollRoute,
    SpeedCamera,
    SurfaceChange,
    RegionEnter,
    RegionExit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::GeofenceEnter => "geofenceEnter",
            EventType::GeofenceExit => "geofenceExit",
            EventType::CustomToll => "customToll",
            EventType::TollRoute => "tollRoute",
            EventType::SpeedCamera => "speedCamera",
            EventType::SurfaceChange => "surfaceChange",
            EventType::RegionEnter => "regionEnter",
            EventType::RegionExit => "regionExit",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub device_id: DeviceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geofence_id: Option<GeofenceId>,
    pub event_time: DateTime<Utc>,
    pub attributes: FxHashMap<String, serde_json::Value>,
}

impl Event {
    /// Create an event from the triggering position, copying identity and time
    pub fn new(event_type: EventType, position: &Position) -> Self {
        Self {
            id: new_uuid_v7(),
            event_type,
            device_id: position.device_id,
            geofence_id: None,
            event_time: position.fix_time,
            attributes: FxHashMap::default(),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_geofence(mut self, geofence_id: GeofenceId) -> Self {
        self.geofence_id = Some(geofence_id);
        self
    }

    pub fn attr_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(|v| v.as_f64())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{DeviceId, PositionId, KEY_TOTAL_DISTANCE};
    use chrono::TimeZone;

    #[test]
    fn test_event_copies_position_identity() {
        let fix_time = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let position = Position::new(DeviceId(5), PositionId(100), fix_time);

        let event = Event::new(EventType::GeofenceEnter, &position)
            .with_geofence(GeofenceId(9))
            .with(KEY_TOTAL_DISTANCE, 1234.0);

        assert_eq!(event.device_id, DeviceId(5));
        assert_eq!(event.geofence_id, Some(GeofenceId(9)));
        assert_eq!(event.event_time, fix_time);
        assert_eq!(event.attr_f64(KEY_TOTAL_DISTANCE), Some(1234.0));
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_event_json_shape() {
        let fix_time = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let position = Position::new(DeviceId(5), PositionId(100), fix_time);
        let event = Event::new(EventType::SpeedCamera, &position);

        let parsed: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(parsed["type"], "speedCamera");
        assert_eq!(parsed["deviceId"], 5);
        assert!(parsed.get("geofenceId").is_none());
    }

    #[test]
    fn test_event_type_as_str() {
        assert_eq!(EventType::GeofenceExit.as_str(), "geofenceExit");
        assert_eq!(EventType::CustomToll.as_str(), "customToll");
        assert_eq!(EventType::RegionEnter.as_str(), "regionEnter");
    }
}
