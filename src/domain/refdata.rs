//! Reference data consumed by the detectors
//!
//! Devices, groups, geofences and calendars are owned externally; the core
//! only reads them. Lookups that miss are treated as "skip the affected
//! candidate", never as errors.

use anyhow::Context;
use crate::domain::position::{DeviceId, GeofenceId};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Comma-separated custom toll names, matched case-insensitively
    #[serde(default)]
    pub custom_road_event: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub custom_road_event: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub id: GeofenceId,
    pub name: String,
    #[serde(default)]
    pub calendar_id: Option<i64>,
}

/// Absolute UTC windows during which a geofence's events are reportable
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calendar {
    pub id: i64,
    #[serde(default)]
    pub windows: Vec<CalendarWindow>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Calendar {
    /// True when the moment falls inside any window. A calendar without
    /// windows is permissive.
    pub fn check_moment(&self, moment: DateTime<Utc>) -> bool {
        if self.windows.is_empty() {
            return true;
        }
        self.windows.iter().any(|w| moment >= w.start && moment < w.end)
    }
}

/// On-disk shape of the reference data file: one JSON document with
/// optional arrays per entity
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReferenceData {
    pub devices: Vec<Device>,
    pub groups: Vec<Group>,
    pub geofences: Vec<Geofence>,
    pub calendars: Vec<Calendar>,
}

/// In-process lookup tables, populated at startup, read-only afterwards
#[derive(Debug, Default)]
pub struct ReferenceStore {
    devices: FxHashMap<i64, Device>,
    groups: FxHashMap<i64, Group>,
    geofences: FxHashMap<i64, Geofence>,
    calendars: FxHashMap<i64, Calendar>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load reference data from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read reference data file {}", path.display()))?;
        let data: ReferenceData = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse reference data file {}", path.display()))?;
        Ok(Self::from_data(data))
    }

    pub fn from_data(data: ReferenceData) -> Self {
        let mut store = Self::new();
        for device in data.devices {
            store.add_device(device);
        }
        for group in data.groups {
            store.add_group(group);
        }
        for geofence in data.geofences {
            store.add_geofence(geofence);
        }
        for calendar in data.calendars {
            store.add_calendar(calendar);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.devices.len() + self.groups.len() + self.geofences.len() + self.calendars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_device(&mut self, device: Device) {
        self.devices.insert(device.id.0, device);
    }

    pub fn add_group(&mut self, group: Group) {
        self.groups.insert(group.id, group);
    }

    pub fn add_geofence(&mut self, geofence: Geofence) {
        self.geofences.insert(geofence.id.0, geofence);
    }

    pub fn add_calendar(&mut self, calendar: Calendar) {
        self.calendars.insert(calendar.id, calendar);
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id.0)
    }

    pub fn group(&self, id: i64) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn geofence(&self, id: GeofenceId) -> Option<&Geofence> {
        self.geofences.get(&id.0)
    }

    pub fn calendar(&self, id: i64) -> Option<&Calendar> {
        self.calendars.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_calendar_windows() {
        let calendar = Calendar {
            id: 1,
            windows: vec![CalendarWindow {
                start: Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2025, 6, 1, 17, 0, 0).unwrap(),
            }],
        };

        assert!(calendar.check_moment(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()));
        assert!(!calendar.check_moment(Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap()));
    }

    #[test]
    fn test_calendar_without_windows_is_permissive() {
        let calendar = Calendar { id: 1, windows: vec![] };
        assert!(calendar.check_moment(Utc::now()));
    }

    #[test]
    fn test_from_file_loads_all_entities() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "devices": [{{"id": 1, "name": "truck-1", "groupId": 4}}],
                "groups": [{{"id": 4, "name": "fleet", "customRoadEvent": "Route7"}}],
                "geofences": [{{"id": 9, "name": "depot", "calendarId": 5}}],
                "calendars": [{{"id": 5, "windows": [
                    {{"start": "2025-06-01T08:00:00Z", "end": "2025-06-01T10:00:00Z"}}
                ]}}]
            }}"#
        )
        .unwrap();
        file.flush().unwrap();

        let store = ReferenceStore::from_file(file.path()).unwrap();
        assert_eq!(store.len(), 4);
        assert_eq!(store.device(DeviceId(1)).unwrap().group_id, Some(4));
        assert_eq!(store.group(4).unwrap().custom_road_event.as_deref(), Some("Route7"));
        assert_eq!(store.geofence(GeofenceId(9)).unwrap().calendar_id, Some(5));
        assert_eq!(store.calendar(5).unwrap().windows.len(), 1);
    }

    #[test]
    fn test_from_file_accepts_partial_document() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"devices": [{{"id": 2, "name": "truck-2"}}]}}"#).unwrap();
        file.flush().unwrap();

        let store = ReferenceStore::from_file(file.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.device(DeviceId(2)).is_some());
        assert!(store.group(1).is_none());
    }

    #[test]
    fn test_from_file_errors() {
        use std::io::Write;

        assert!(ReferenceStore::from_file("/nonexistent/refdata.json").is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        file.flush().unwrap();
        assert!(ReferenceStore::from_file(file.path()).is_err());
    }

    #[test]
    fn test_reference_store_lookups() {
        let mut store = ReferenceStore::new();
        store.add_device(Device {
            id: DeviceId(1),
            name: "truck-1".to_string(),
            group_id: Some(4),
            custom_road_event: None,
        });
        store.add_group(Group {
            id: 4,
            name: "north-fleet".to_string(),
            custom_road_event: Some("Route7".to_string()),
        });

        assert_eq!(store.device(DeviceId(1)).unwrap().group_id, Some(4));
        assert_eq!(store.group(4).unwrap().custom_road_event.as_deref(), Some("Route7"));
        assert!(store.device(DeviceId(2)).is_none());
        assert!(store.geofence(GeofenceId(9)).is_none());
    }
}
