//! Geofence enter/exit detection and distance bookkeeping
//!
//! Two responsibilities fused because they share the same input: emitting
//! enter/exit events from the symmetric difference of the previous and
//! current geofence sets, and appending raw distance markers at every
//! inside/outside transition. Exits are evaluated before enters; a geofence
//! with a calendar only reports while the fix time falls inside it.

use crate::domain::marker::{DistanceMarker, MarkerType};
use crate::domain::position::KEY_TOTAL_DISTANCE;
use crate::domain::refdata::ReferenceStore;
use crate::domain::{Event, EventType, GeofenceId, Position};
use crate::infra::StateStore;
use crate::io::sinks::MarkerStore;
use crate::services::codec::{self, STATE_VERSION};
use crate::services::detectors::EventDetector;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeofenceState {
    version: u32,
    /// Geofence set of the previous position, for the enter/exit diff
    last_geofences: Vec<i64>,
    /// Geofences the device is currently inside, with entry odometer
    active: FxHashMap<i64, f64>,
}

impl Default for GeofenceState {
    fn default() -> Self {
        Self { version: STATE_VERSION, last_geofences: Vec::new(), active: FxHashMap::default() }
    }
}

pub struct GeofenceDetector {
    store: StateStore,
    refs: Arc<ReferenceStore>,
    markers: Arc<dyn MarkerStore>,
}

impl GeofenceDetector {
    pub fn new(store: StateStore, refs: Arc<ReferenceStore>, markers: Arc<dyn MarkerStore>) -> Self {
        Self { store, refs, markers }
    }

    fn cache_key(position: &Position) -> String {
        format!("geofence:{}:dist", position.device_id)
    }

    /// Calendar gate: missing geofence skips the candidate, a configured
    /// calendar suppresses events outside its windows.
    fn reportable(&self, geofence_id: GeofenceId, position: &Position) -> bool {
        let Some(geofence) = self.refs.geofence(geofence_id) else {
            debug!(geofence_id = %geofence_id, "geofence_unknown_skipped");
            return false;
        };
        match geofence.calendar_id.and_then(|id| self.refs.calendar(id)) {
            Some(calendar) => calendar.check_moment(position.fix_time),
            None => true,
        }
    }

    fn transition_events(&self, state: &GeofenceState, position: &Position) -> Vec<Event> {
        let current: Vec<i64> = position.geofence_ids.iter().map(|g| g.0).collect();
        let mut events = Vec::new();

        // Exits before enters: part of the observable contract.
        for old_id in state.last_geofences.iter().filter(|id| !current.contains(id)) {
            let geofence_id = GeofenceId(*old_id);
            if self.reportable(geofence_id, position) {
                events.push(
                    Event::new(EventType::GeofenceExit, position)
                        .with_geofence(geofence_id)
                        .with(KEY_TOTAL_DISTANCE, position.total_distance()),
                );
            }
        }
        for new_id in current.iter().filter(|id| !state.last_geofences.contains(id)) {
            let geofence_id = GeofenceId(*new_id);
            if self.reportable(geofence_id, position) {
                events.push(
                    Event::new(EventType::GeofenceEnter, position)
                        .with_geofence(geofence_id)
                        .with(KEY_TOTAL_DISTANCE, position.total_distance()),
                );
            }
        }
        events
    }

    /// Update inside/outside bookkeeping, producing one marker per genuine
    /// transition. An empty current set force-closes every active geofence.
    fn update_markers(state: &mut GeofenceState, position: &Position) -> Vec<DistanceMarker> {
        let current: Vec<i64> = position.geofence_ids.iter().map(|g| g.0).collect();
        let total_distance = position.total_distance();
        let mut markers = Vec::new();

        if current.is_empty() && !state.active.is_empty() {
            debug!(device_id = %position.device_id, "geofence_exit_all");
        }

        let mut exited: Vec<i64> =
            state.active.keys().filter(|id| !current.contains(id)).copied().collect();
        exited.sort_unstable();
        for id in exited {
            state.active.remove(&id);
            markers.push(Self::marker(position, id, MarkerType::Exit, total_distance));
        }

        for id in &current {
            if !state.active.contains_key(id) {
                state.active.insert(*id, total_distance);
                markers.push(Self::marker(position, *id, MarkerType::Enter, total_distance));
            }
        }

        state.last_geofences = current;
        markers
    }

    fn marker(
        position: &Position,
        geofence_id: i64,
        marker_type: MarkerType,
        total_distance: f64,
    ) -> DistanceMarker {
        DistanceMarker {
            device_id: position.device_id,
            geofence_id: GeofenceId(geofence_id),
            position_id: position.id,
            marker_type,
            total_distance,
            fix_time: position.fix_time,
        }
    }
}

#[async_trait]
impl EventDetector for GeofenceDetector {
    fn name(&self) -> &'static str {
        "geofence"
    }

    async fn on_position(&self, position: &Position) -> Vec<Event> {
        let key = Self::cache_key(position);
        let mut state: GeofenceState = match self.store.load(&key).await {
            Some(json) => codec::decode(&key, &json).unwrap_or_default(),
            None => GeofenceState::default(),
        };

        let events = self.transition_events(&state, position);
        let markers = Self::update_markers(&mut state, position);

        if let Some(json) = codec::encode(&key, &state) {
            self.store.save(&key, &json).await;
        }

        // Fire-and-forget: a failed append must not hold up detection.
        if !markers.is_empty() {
            if let Err(e) = self.markers.append(&markers).await {
                warn!(device_id = %position.device_id, error = %e, "marker_append_failed");
            }
        }

        events
    }
}
