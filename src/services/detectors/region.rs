//! Administrative-region change detection
//!
//! Tracks the reverse-geocoded country, state and city independently. Each
//! level compares its current value against the remembered one and emits an
//! exit for the old region followed by an enter for the new one. A level
//! missing from the position is no observation for that level only; a
//! position with none of the three tags is ignored outright, so a geocoder
//! outage cannot fabricate region churn.

use crate::domain::{Event, EventType, Position};
use crate::infra::StateStore;
use crate::services::codec::{self, STATE_VERSION};
use crate::services::detectors::EventDetector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

const LEVELS: [&str; 3] = ["country", "state", "city"];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegionState {
    version: u32,
    country: Option<String>,
    state: Option<String>,
    city: Option<String>,
}

impl Default for RegionState {
    fn default() -> Self {
        Self { version: STATE_VERSION, country: None, state: None, city: None }
    }
}

impl RegionState {
    fn get(&self, level: &str) -> Option<&str> {
        match level {
            "country" => self.country.as_deref(),
            "state" => self.state.as_deref(),
            _ => self.city.as_deref(),
        }
    }

    fn set(&mut self, level: &str, value: String) {
        match level {
            "country" => self.country = Some(value),
            "state" => self.state = Some(value),
            _ => self.city = Some(value),
        }
    }
}

pub struct RegionDetector {
    store: StateStore,
}

impl RegionDetector {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    fn cache_key(position: &Position) -> String {
        format!("region:{}", position.device_id)
    }

    fn observed(position: &Position, level: &str) -> Option<String> {
        let value = match level {
            "country" => position.country(),
            "state" => position.state(),
            _ => position.city(),
        };
        value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
    }

    fn region_event(event_type: EventType, position: &Position, level: &str, name: &str) -> Event {
        Event::new(event_type, position).with("level", level).with("name", name)
    }
}

#[async_trait]
impl EventDetector for RegionDetector {
    fn name(&self) -> &'static str {
        "region"
    }

    async fn on_position(&self, position: &Position) -> Vec<Event> {
        if !position.valid {
            return Vec::new();
        }
        if LEVELS.iter().all(|level| Self::observed(position, level).is_none()) {
            return Vec::new();
        }

        let key = Self::cache_key(position);
        let mut state: RegionState = match self.store.load(&key).await {
            Some(json) => codec::decode(&key, &json).unwrap_or_default(),
            None => RegionState::default(),
        };

        let mut events = Vec::new();
        for level in LEVELS {
            let Some(current) = Self::observed(position, level) else { continue };
            if state.get(level) == Some(current.as_str()) {
                continue;
            }

            if let Some(previous) = state.get(level) {
                events.push(Self::region_event(EventType::RegionExit, position, level, previous));
            }
            events.push(Self::region_event(EventType::RegionEnter, position, level, &current));
            info!(
                device_id = %position.device_id,
                level = %level,
                region = %current,
                "region_changed"
            );
            state.set(level, current);
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
    use crate::domain::position::{DeviceId, PositionId, KEY_CITY, KEY_COUNTRY, KEY_STATE};
    use chrono::{TimeZone, Utc};

    fn detector() -> RegionDetector {
        RegionDetector::new(StateStore::local_only())
    }

    fn position(id: i64, country: Option<&str>, state: Option<&str>, city: Option<&str>) -> Position {
        let mut position = Position::new(
            DeviceId(1),
            PositionId(id),
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, id as u32).unwrap(),
        );
        if let Some(country) = country {
            position.set(KEY_COUNTRY, country);
        }
        if let Some(state) = state {
            position.set(KEY_STATE, state);
        }
        if let Some(city) = city {
            position.set(KEY_CITY, city);
        }
        position
    }

    #[tokio::test]
    async fn test_first_observation_enters_without_exit() {
        let detector = detector();

        let events =
            detector.on_position(&position(1, Some("IS"), Some("Sudurland"), Some("Selfoss"))).await;
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.event_type == EventType::RegionEnter));
        assert_eq!(events[0].attr_string("level"), Some("country"));
        assert_eq!(events[1].attr_string("level"), Some("state"));
        assert_eq!(events[2].attr_string("level"), Some("city"));
    }

    #[tokio::test]
    async fn test_change_emits_exit_then_enter() {
        let detector = detector();

        detector.on_position(&position(1, Some("IS"), None, Some("Selfoss"))).await;
        let events = detector.on_position(&position(2, Some("IS"), None, Some("Hella"))).await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::RegionExit);
        assert_eq!(events[0].attr_string("name"), Some("Selfoss"));
        assert_eq!(events[1].event_type, EventType::RegionEnter);
        assert_eq!(events[1].attr_string("name"), Some("Hella"));
        assert!(events.iter().all(|e| e.attr_string("level") == Some("city")));
    }

    #[tokio::test]
    async fn test_unchanged_regions_are_silent() {
        let detector = detector();

        detector.on_position(&position(1, Some("IS"), Some("Sudurland"), None)).await;
        let events = detector.on_position(&position(2, Some("IS"), Some("Sudurland"), None)).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_missing_level_keeps_remembered_value() {
        let detector = detector();

        detector.on_position(&position(1, Some("IS"), None, Some("Selfoss"))).await;
        // City missing: no city observation, not a city exit.
        assert!(detector.on_position(&position(2, Some("IS"), None, None)).await.is_empty());
        // Same city reappearing is unchanged.
        assert!(detector.on_position(&position(3, Some("IS"), None, Some("Selfoss"))).await.is_empty());
    }

    #[tokio::test]
    async fn test_all_levels_absent_ignored() {
        let detector = detector();

        detector.on_position(&position(1, Some("IS"), None, None)).await;
        assert!(detector.on_position(&position(2, None, None, None)).await.is_empty());
        // Remembered country survives the blank position.
        assert!(detector.on_position(&position(3, Some("IS"), None, None)).await.is_empty());
    }

    #[tokio::test]
    async fn test_levels_change_independently() {
        let detector = detector();

        detector.on_position(&position(1, Some("IS"), Some("Sudurland"), Some("Selfoss"))).await;
        let events = detector
            .on_position(&position(2, Some("IS"), Some("Vesturland"), Some("Borgarnes")))
            .await;

        // Country unchanged, state and city each exit+enter.
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].attr_string("level"), Some("state"));
        assert_eq!(events[0].event_type, EventType::RegionExit);
        assert_eq!(events[2].attr_string("level"), Some("city"));
    }

    #[tokio::test]
    async fn test_blank_name_is_no_observation() {
        let detector = detector();

        detector.on_position(&position(1, Some("IS"), None, None)).await;
        assert!(detector.on_position(&position(2, Some("  "), None, None)).await.is_empty());
    }
}
