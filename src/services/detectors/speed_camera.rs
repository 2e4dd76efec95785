//! Speed-camera violation detection
//!
//! A violation is a confirmed streak of positions exceeding the map-matched
//! speed limit on an allow-listed highway class. The device reports speed in
//! knots; the limit is km/h, so samples convert before comparing. Positions
//! missing the limit or the highway tag are no observation at all, they
//! neither advance nor reset the streak. After a violation fires the counter
//! clears, so with a window of one every violating position reports.

use crate::domain::position::{KEY_HIGHWAY, KEY_SPEED_LIMIT};
use crate::domain::{Event, EventType, Position};
use crate::infra::StateStore;
use crate::services::codec::{self, STATE_VERSION};
use crate::services::debounce::ConfidenceCounter;
use crate::services::detectors::{parse_name_list, EventDetector};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

const KNOTS_TO_KMH: f64 = 1.852;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpeedCameraState {
    version: u32,
    over_limit: ConfidenceCounter,
}

impl Default for SpeedCameraState {
    fn default() -> Self {
        Self { version: STATE_VERSION, over_limit: ConfidenceCounter::new() }
    }
}

pub struct SpeedCameraDetector {
    store: StateStore,
    window: u32,
    highways: Vec<String>,
}

impl SpeedCameraDetector {
    pub fn new(store: StateStore, window: u32, highways: &str) -> Self {
        Self { store, window, highways: parse_name_list(highways) }
    }

    fn cache_key(position: &Position) -> String {
        format!("speed_camera:{}", position.device_id)
    }

    /// `None` when limit or highway tag is missing, otherwise whether this
    /// sample violates on an allow-listed road.
    fn observation(&self, position: &Position) -> Option<bool> {
        let limit = position.speed_limit()?;
        let highway = position.highway()?.to_lowercase();

        let on_listed_highway = self.highways.iter().any(|h| *h == highway);
        let speed_kmh = position.speed_knots() * KNOTS_TO_KMH;
        Some(on_listed_highway && speed_kmh > limit)
    }
}

#[async_trait]
impl EventDetector for SpeedCameraDetector {
    fn name(&self) -> &'static str {
        "speed_camera"
    }

    async fn on_position(&self, position: &Position) -> Vec<Event> {
        if !position.valid {
            return Vec::new();
        }

        let Some(observation) = self.observation(position) else {
            return Vec::new();
        };

        let key = Self::cache_key(position);
        let mut state: SpeedCameraState = match self.store.load(&key).await {
            Some(json) => codec::decode(&key, &json).unwrap_or_default(),
            None => SpeedCameraState::default(),
        };

        let mut events = Vec::new();
        if state.over_limit.observe(Some(observation), self.window) {
            let speed_kmh = position.speed_knots() * KNOTS_TO_KMH;
            info!(
                device_id = %position.device_id,
                speed_kmh = %speed_kmh,
                limit = ?position.speed_limit(),
                "speed_camera_violation"
            );

            let mut event = Event::new(EventType::SpeedCamera, position)
                .with("speedKmh", speed_kmh)
                .with("latitude", position.latitude)
                .with("longitude", position.longitude);
            if let Some(limit) = position.speed_limit() {
                event.set(KEY_SPEED_LIMIT, limit);
            }
            if let Some(highway) = position.highway() {
                event.set(KEY_HIGHWAY, highway);
            }
            events.push(event);

            // Each violation needs a fresh streak.
            state.over_limit.clear();
        }

        if let Some(json) = codec::encode(&key, &state) {
            self.store.save(&key, &json).await;
        }

        events
    }
}
