//! Toll-route detection
//!
//! Two independent confidence signals per device share the configured
//! minimal-duration window: `on_toll` follows the position's toll flag and
//! drives toll-trip bookkeeping (entry odometer, entry time, one TollRoute
//! event per completed trip), `on_custom_toll` follows a case-insensitive
//! match of the position's toll name against the owning group's and the
//! device's `customRoadEvent` lists (group first, device only if no group
//! match) and fires one CustomToll event per newly confirmed name.
//!
//! An absent toll flag is "no observation" and never resets progress.

use crate::domain::position::{
    KEY_SURFACE, KEY_TOLL_NAME, KEY_TOLL_REF, KEY_TOTAL_DISTANCE,
};
use crate::domain::refdata::ReferenceStore;
use crate::domain::{Event, EventType, Position};
use crate::infra::StateStore;
use crate::services::codec::{self, STATE_VERSION};
use crate::services::debounce::{ConfidenceCounter, PresenceStreak};
use crate::services::detectors::{parse_name_list, EventDetector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TollState {
    version: u32,
    on_toll: PresenceStreak,
    on_custom_toll: ConfidenceCounter,
    last_custom_toll_name: Option<String>,
    /// Odometer at confirmed toll entry; 0 means "not on a toll trip"
    toll_start_distance: f64,
    toll_start_time: Option<DateTime<Utc>>,
    toll_ref: Option<String>,
    toll_name: Option<String>,
    /// Durable device attributes need persisting; signaled, not performed
    #[serde(skip)]
    changed: bool,
}

impl Default for TollState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            on_toll: PresenceStreak::new(),
            on_custom_toll: ConfidenceCounter::new(),
            last_custom_toll_name: None,
            toll_start_distance: 0.0,
            toll_start_time: None,
            toll_ref: None,
            toll_name: None,
            changed: false,
        }
    }
}

pub struct TollDetector {
    store: StateStore,
    refs: Arc<ReferenceStore>,
    minimal_duration: u32,
}

impl TollDetector {
    pub fn new(store: StateStore, refs: Arc<ReferenceStore>, minimal_duration: u32) -> Self {
        Self { store, refs, minimal_duration }
    }

    fn cache_key(position: &Position) -> String {
        format!("toll:{}", position.device_id)
    }

    /// Group list first; the device list is consulted only when the group
    /// has no match.
    fn matches_custom_list(&self, position: &Position) -> bool {
        let Some(toll_name) = position.toll_name() else { return false };
        let toll_name = toll_name.trim().to_lowercase();

        let Some(device) = self.refs.device(position.device_id) else { return false };
        let group_list = device
            .group_id
            .and_then(|id| self.refs.group(id))
            .and_then(|g| g.custom_road_event.as_deref());

        if let Some(list) = group_list {
            if parse_name_list(list).iter().any(|name| *name == toll_name) {
                return true;
            }
        }
        if let Some(list) = device.custom_road_event.as_deref() {
            return parse_name_list(list).iter().any(|name| *name == toll_name);
        }
        false
    }

    fn custom_toll_event(&self, state: &mut TollState, position: &Position) -> Option<Event> {
        if !state.on_custom_toll.is_confirmed() {
            return None;
        }
        let toll_name = position.toll_name()?;
        if state.last_custom_toll_name.as_deref() == Some(toll_name) {
            return None;
        }

        state.last_custom_toll_name = Some(toll_name.to_string());
        debug!(
            device_id = %position.device_id,
            toll_name = %toll_name,
            window = %self.minimal_duration,
            "custom_toll_confirmed"
        );

        let mut event = Event::new(EventType::CustomToll, position)
            .with(KEY_TOLL_NAME, toll_name)
            .with(KEY_TOTAL_DISTANCE, position.total_distance())
            .with("latitude", position.latitude)
            .with("longitude", position.longitude);
        if let Some(toll_ref) = position.toll_ref() {
            event.set(KEY_TOLL_REF, toll_ref);
        }
        Some(event)
    }

    /// Toll-trip state machine driven by the confirmed on/off polarity.
    fn update_trip(&self, state: &mut TollState, position: &Position) -> Option<Event> {
        match state.on_toll.confirmed(self.minimal_duration) {
            Some(true) => {
                if state.toll_start_distance == 0.0 {
                    state.toll_start_distance = position.total_distance();
                    state.toll_start_time = Some(position.fix_time);
                    state.toll_ref = position.toll_ref().map(str::to_string);
                    state.toll_name = position.toll_name().map(str::to_string);
                    state.changed = true;
                    info!(
                        device_id = %position.device_id,
                        start_distance = %state.toll_start_distance,
                        "toll_trip_started"
                    );
                } else {
                    // Already on a trip: backfill names seen mid-route.
                    if state.toll_ref.is_none() {
                        state.toll_ref = position.toll_ref().map(str::to_string);
                    }
                    if state.toll_name.is_none() {
                        state.toll_name = position.toll_name().map(str::to_string);
                    }
                }
                None
            }
            Some(false) if state.toll_start_distance > 0.0 => {
                let distance = position.total_distance() - state.toll_start_distance;
                let enter_time = state.toll_start_time;

                let mut event =
                    Event::new(EventType::TollRoute, position).with("distance", distance);
                if let Some(name) = state.toll_name.clone().or_else(|| state.toll_ref.clone()) {
                    event.set(KEY_TOLL_NAME, name);
                }
                if let Some(toll_ref) = &state.toll_ref {
                    event.set(KEY_TOLL_REF, toll_ref.clone());
                }
                if let Some(surface) = position.surface() {
                    event.set(KEY_SURFACE, surface);
                }
                if let Some(enter_time) = enter_time {
                    event.set("enterTime", enter_time.timestamp_millis());
                    event.set("exitTime", position.fix_time.timestamp_millis());
                    event.set(
                        "duration",
                        position.fix_time.timestamp_millis() - enter_time.timestamp_millis(),
                    );
                }

                info!(
                    device_id = %position.device_id,
                    distance = %distance,
                    "toll_trip_completed"
                );

                state.toll_start_distance = 0.0;
                state.toll_start_time = None;
                state.toll_ref = None;
                state.toll_name = None;
                state.changed = true;
                Some(event)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl EventDetector for TollDetector {
    fn name(&self) -> &'static str {
        "toll"
    }

    async fn on_position(&self, position: &Position) -> Vec<Event> {
        if !position.valid {
            return Vec::new();
        }
        if self.refs.device(position.device_id).is_none() {
            debug!(device_id = %position.device_id, "toll_unknown_device_skipped");
            return Vec::new();
        }

        let key = Self::cache_key(position);
        let mut state: TollState = match self.store.load(&key).await {
            Some(json) => codec::decode(&key, &json).unwrap_or_default(),
            None => TollState::default(),
        };

        state.on_toll.observe(position.toll_flag());
        let is_custom_match = self.matches_custom_list(position);
        state.on_custom_toll.observe(Some(is_custom_match), self.minimal_duration);

        let mut events = Vec::new();
        if let Some(event) = self.custom_toll_event(&mut state, position) {
            events.push(event);
        }
        if let Some(event) = self.update_trip(&mut state, position) {
            events.push(event);
        }

        if state.changed {
            // Durable device-attribute update is the caller's concern.
            debug!(device_id = %position.device_id, "toll_device_attributes_changed");
        }

        if let Some(json) = codec::encode(&key, &state) {
            self.store.save(&key, &json).await;
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{DeviceId, PositionId, KEY_TOLL};
    use crate::domain::refdata::{Device, Group};
    use chrono::TimeZone;

    fn refs(group_list: Option<&str>, device_list: Option<&str>) -> Arc<ReferenceStore> {
        let mut refs = ReferenceStore::new();
        refs.add_device(Device {
            id: DeviceId(1),
            name: "truck-1".to_string(),
            group_id: group_list.map(|_| 4),
            custom_road_event: device_list.map(str::to_string),
        });
        if let Some(list) = group_list {
            refs.add_group(Group {
                id: 4,
                name: "fleet".to_string(),
                custom_road_event: Some(list.to_string()),
            });
        }
        Arc::new(refs)
    }

    fn detector(refs: Arc<ReferenceStore>, window: u32) -> TollDetector {
        TollDetector::new(StateStore::local_only(), refs, window)
    }

    fn position(id: i64, toll_name: Option<&str>) -> Position {
        let mut position = Position::new(
            DeviceId(1),
            PositionId(id),
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, id as u32).unwrap(),
        )
        .with(KEY_TOTAL_DISTANCE, 1000.0 + id as f64 * 10.0);
        if let Some(name) = toll_name {
            position.set(KEY_TOLL_NAME, name);
        }
        position
    }

    #[tokio::test]
    async fn test_custom_toll_fires_once_after_window() {
        let detector = detector(refs(Some("Route7"), None), 3);

        assert!(detector.on_position(&position(1, Some("Route7"))).await.is_empty());
        assert!(detector.on_position(&position(2, Some("Route7"))).await.is_empty());

        let events = detector.on_position(&position(3, Some("Route7"))).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::CustomToll);
        assert_eq!(events[0].attr_string(KEY_TOLL_NAME), Some("Route7"));

        // 4th matching position must not re-fire for the same name.
        assert!(detector.on_position(&position(4, Some("Route7"))).await.is_empty());
    }

    #[tokio::test]
    async fn test_custom_toll_name_match_is_case_insensitive() {
        let detector = detector(refs(Some("route7, Ring Road"), None), 2);

        detector.on_position(&position(1, Some("RING ROAD"))).await;
        let events = detector.on_position(&position(2, Some("ring road"))).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_device_list_used_when_group_misses() {
        let detector = detector(refs(Some("Route1"), Some("Route7")), 1);

        let events = detector.on_position(&position(1, Some("Route7"))).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_non_matching_name_resets_streak() {
        let detector = detector(refs(Some("Route7"), None), 3);

        detector.on_position(&position(1, Some("Route7"))).await;
        detector.on_position(&position(2, Some("Route7"))).await;
        detector.on_position(&position(3, Some("other"))).await;

        // Streak was reset; two more matches are not enough.
        assert!(detector.on_position(&position(4, Some("Route7"))).await.is_empty());
        assert!(detector.on_position(&position(5, Some("Route7"))).await.is_empty());
        let events = detector.on_position(&position(6, Some("Route7"))).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_device_skipped() {
        let detector = detector(Arc::new(ReferenceStore::new()), 1);
        assert!(detector.on_position(&position(1, Some("Route7"))).await.is_empty());
    }

    #[tokio::test]
    async fn test_toll_trip_emits_on_confirmed_exit() {
        let detector = detector(refs(None, None), 2);

        let on = |id: i64, flag: bool, distance: f64| {
            Position::new(
                DeviceId(1),
                PositionId(id),
                Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, id as u32).unwrap(),
            )
            .with(KEY_TOLL, flag)
            .with(KEY_TOTAL_DISTANCE, distance)
            .with(KEY_TOLL_REF, "E1")
        };

        // Two on-toll samples confirm entry at 1000.
        assert!(detector.on_position(&on(1, true, 990.0)).await.is_empty());
        assert!(detector.on_position(&on(2, true, 1000.0)).await.is_empty());

        // Two off-toll samples confirm the exit.
        assert!(detector.on_position(&on(3, false, 1200.0)).await.is_empty());
        let events = detector.on_position(&on(4, false, 1300.0)).await;

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, EventType::TollRoute);
        assert_eq!(event.attr_f64("distance"), Some(300.0));
        assert_eq!(event.attr_string(KEY_TOLL_REF), Some("E1"));
        assert!(event.attributes.contains_key("duration"));

        // Trip state was cleared; another off-toll sample emits nothing.
        assert!(detector.on_position(&on(5, false, 1400.0)).await.is_empty());
    }

    #[tokio::test]
    async fn test_absent_toll_flag_keeps_trip_state() {
        let detector = detector(refs(None, None), 1);

        let mut on = position(1, None);
        on.set(KEY_TOLL, true);
        on.set(KEY_TOTAL_DISTANCE, 500.0);
        detector.on_position(&on).await;

        // Flag absent: no observation, trip stays open.
        assert!(detector.on_position(&position(2, None)).await.is_empty());

        let mut off = position(3, None);
        off.set(KEY_TOLL, false);
        off.set(KEY_TOTAL_DISTANCE, 800.0);
        let events = detector.on_position(&off).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attr_f64("distance"), Some(300.0));
    }
}
