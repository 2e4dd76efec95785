//! Road-surface change detection
//!
//! Reports once when the device has been on an alert-listed surface for the
//! configured number of consecutive samples. Every surface tag feeds the
//! streak, so any change of surface restarts the count; the alert list gates
//! only which confirmed surfaces produce an event. Positions without a
//! surface tag are skipped without touching the streak, so a brief
//! map-matching gap does not restart the count.

use crate::domain::position::KEY_SURFACE;
use crate::domain::{Event, EventType, Position};
use crate::infra::StateStore;
use crate::services::codec::{self, STATE_VERSION};
use crate::services::debounce::SurfaceStreak;
use crate::services::detectors::{parse_name_list, EventDetector};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SurfaceState {
    version: u32,
    streak: SurfaceStreak,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self { version: STATE_VERSION, streak: SurfaceStreak::new() }
    }
}

pub struct SurfaceDetector {
    store: StateStore,
    window: u32,
    alert_types: Vec<String>,
}

impl SurfaceDetector {
    pub fn new(store: StateStore, window: u32, alert_types: &str) -> Self {
        Self { store, window, alert_types: parse_name_list(alert_types) }
    }

    fn cache_key(position: &Position) -> String {
        format!("surface:{}", position.device_id)
    }
}

#[async_trait]
impl EventDetector for SurfaceDetector {
    fn name(&self) -> &'static str {
        "surface"
    }

    async fn on_position(&self, position: &Position) -> Vec<Event> {
        if !position.valid {
            return Vec::new();
        }

        let Some(surface) = position.surface() else {
            return Vec::new();
        };
        let lowered = surface.to_lowercase();

        let key = Self::cache_key(position);
        let mut state: SurfaceState = match self.store.load(&key).await {
            Some(json) => codec::decode(&key, &json).unwrap_or_default(),
            None => SurfaceState::default(),
        };

        let confirmed = state.streak.observe(surface, self.window);
        let alertable = self.alert_types.iter().any(|t| *t == lowered);

        let mut events = Vec::new();
        if confirmed && alertable {
            info!(
                device_id = %position.device_id,
                surface = %lowered,
                window = %self.window,
                "surface_change_confirmed"
            );
            events.push(
                Event::new(EventType::SurfaceChange, position)
                    .with(KEY_SURFACE, lowered)
                    .with("latitude", position.latitude)
                    .with("longitude", position.longitude),
            );
        }

        if let Some(json) = codec::encode(&key, &state) {
            self.store.save(&key, &json).await;
        }

        events
    }
}
