//! Normalized telemetry position model
//!
//! A `Position` is one device telemetry sample after protocol decoding and
//! geofence evaluation upstream. Well-known derived values (odometer, road
//! tags, reverse-geocoded region names) travel in an open attribute bag;
//! absent attributes read as `None`, never as a sentinel value.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Newtype wrapper for device IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DeviceId(pub i64);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for geofence IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GeofenceId(pub i64);

impl std::fmt::Display for GeofenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for position IDs (strictly increasing per device)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PositionId(pub i64);

impl std::fmt::Display for PositionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Well-known attribute keys, matching the upstream decoder vocabulary.
pub const KEY_TOTAL_DISTANCE: &str = "totalDistance";
pub const KEY_SPEED: &str = "speed";
pub const KEY_SPEED_LIMIT: &str = "speedLimit";
pub const KEY_HIGHWAY: &str = "highway";
pub const KEY_SURFACE: &str = "surface";
pub const KEY_COUNTRY: &str = "country";
pub const KEY_STATE: &str = "state";
pub const KEY_CITY: &str = "city";
pub const KEY_TOLL: &str = "toll";
pub const KEY_TOLL_REF: &str = "tollRef";
pub const KEY_TOLL_NAME: &str = "tollName";

/// One normalized telemetry sample for one device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: PositionId,
    pub device_id: DeviceId,
    pub fix_time: DateTime<Utc>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default = "default_valid")]
    pub valid: bool,
    /// Geofences currently containing the device, evaluated upstream
    #[serde(default)]
    pub geofence_ids: Vec<GeofenceId>,
    #[serde(default)]
    pub attributes: FxHashMap<String, serde_json::Value>,
}

fn default_valid() -> bool {
    true
}

impl Position {
    pub fn new(device_id: DeviceId, id: PositionId, fix_time: DateTime<Utc>) -> Self {
        Self {
            id,
            device_id,
            fix_time,
            latitude: 0.0,
            longitude: 0.0,
            valid: true,
            geofence_ids: Vec::new(),
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

    pub fn with_geofences(mut self, ids: &[i64]) -> Self {
        self.geofence_ids = ids.iter().map(|id| GeofenceId(*id)).collect();
        self
    }

    pub fn attr_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(|v| v.as_f64())
    }

    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(|v| v.as_bool())
    }

    /// Cumulative odometer in meters, monotonically non-decreasing per device
    pub fn total_distance(&self) -> f64 {
        self.attr_f64(KEY_TOTAL_DISTANCE).unwrap_or(0.0)
    }

    /// Ground speed in knots as reported by the device
    pub fn speed_knots(&self) -> f64 {
        self.attr_f64(KEY_SPEED).unwrap_or(0.0)
    }

    pub fn speed_limit(&self) -> Option<f64> {
        self.attr_f64(KEY_SPEED_LIMIT)
    }

    pub fn highway(&self) -> Option<&str> {
        self.attr_string(KEY_HIGHWAY)
    }

    pub fn surface(&self) -> Option<&str> {
        self.attr_string(KEY_SURFACE)
    }

    pub fn country(&self) -> Option<&str> {
        self.attr_string(KEY_COUNTRY)
    }

    pub fn state(&self) -> Option<&str> {
        self.attr_string(KEY_STATE)
    }

    pub fn city(&self) -> Option<&str> {
        self.attr_string(KEY_CITY)
    }

    /// Tri-state toll flag: absent means "no observation", not "off toll"
    pub fn toll_flag(&self) -> Option<bool> {
        self.attr_bool(KEY_TOLL)
    }

    pub fn toll_ref(&self) -> Option<&str> {
        self.attr_string(KEY_TOLL_REF)
    }

    pub fn toll_name(&self) -> Option<&str> {
        self.attr_string(KEY_TOLL_NAME)
    }
}
