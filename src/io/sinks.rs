//! Collaborator boundaries: event delivery and marker persistence
//!
//! Both sinks are best-effort from the engine's point of view. Event
//! delivery is at-least-once; the downstream consumer handles idempotency.
//! Marker appends are fire-and-forget: failures are logged, never retried,
//! and never block the streaming path.

use crate::domain::marker::DistanceMarker;
use crate::domain::position::{DeviceId, GeofenceId};
use crate::domain::Event;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::warn;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

/// Forwards events into a bounded channel consumed by the egress writer
pub struct ChannelEventSink {
    tx: mpsc::Sender<Event>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: Event) {
        if let Err(e) = self.tx.send(event).await {
            warn!(error = %e, "event_sink_closed");
        }
    }
}

/// In-memory sink that records every event, used by tests
#[derive(Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<Event>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: Event) {
        self.events.write().push(event);
    }
}

#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Append raw markers for durable storage
    async fn append(&self, markers: &[DistanceMarker]) -> anyhow::Result<()>;

    /// Markers filtered by device/geofence/time range, ascending by
    /// (device, geofence, position id)
    async fn query(
        &self,
        device_id: Option<DeviceId>,
        geofence_id: Option<GeofenceId>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<DistanceMarker>>;
}

/// RwLock-backed marker store standing in for the durable persistence sink
#[derive(Default)]
pub struct MemoryMarkerStore {
    markers: RwLock<Vec<DistanceMarker>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.markers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.read().is_empty()
    }
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    async fn append(&self, markers: &[DistanceMarker]) -> anyhow::Result<()> {
        self.markers.write().extend_from_slice(markers);
        Ok(())
    }

    async fn query(
        &self,
        device_id: Option<DeviceId>,
        geofence_id: Option<GeofenceId>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<DistanceMarker>> {
        let mut result: Vec<DistanceMarker> = self
            .markers
            .read()
            .iter()
            .filter(|m| device_id.map_or(true, |id| m.device_id == id))
            .filter(|m| geofence_id.map_or(true, |id| m.geofence_id == id))
            .filter(|m| from.map_or(true, |t| m.fix_time >= t))
            .filter(|m| to.map_or(true, |t| m.fix_time <= t))
            .cloned()
            .collect();
        result.sort_by_key(|m| (m.device_id.0, m.geofence_id, m.position_id));
        Ok(result)
    }
}

/// Append-only JSONL marker file, one marker per line
///
/// The durable store behind the `MarkerStore` boundary. Appends go through
/// the same create-parent-then-append path as the event egress; queries read
/// the whole file back, skipping unparsable lines with a warning.
pub struct JsonlMarkerStore {
    file_path: String,
}

impl JsonlMarkerStore {
    pub fn new(file_path: &str) -> Self {
        Self { file_path: file_path.to_string() }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;

        Ok(())
    }
}

#[async_trait]
impl MarkerStore for JsonlMarkerStore {
    async fn append(&self, markers: &[DistanceMarker]) -> anyhow::Result<()> {
        for marker in markers {
            let line = serde_json::to_string(marker)?;
            self.append_line(&line)
                .with_context(|| format!("Failed to append marker to {}", self.file_path))?;
        }
        Ok(())
    }

    async fn query(
        &self,
        device_id: Option<DeviceId>,
        geofence_id: Option<GeofenceId>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<DistanceMarker>> {
        let path = Path::new(&self.file_path);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read marker file {}", self.file_path))?;

        let mut result = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<DistanceMarker>(line) {
                Ok(marker) => result.push(marker),
                Err(e) => warn!(file = %self.file_path, error = %e, "marker_line_skipped"),
            }
        }

        result.retain(|m| {
            device_id.map_or(true, |id| m.device_id == id)
                && geofence_id.map_or(true, |id| m.geofence_id == id)
                && from.map_or(true, |t| m.fix_time >= t)
                && to.map_or(true, |t| m.fix_time <= t)
        });
        result.sort_by_key(|m| (m.device_id.0, m.geofence_id, m.position_id));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::marker::MarkerType;
    use crate::domain::position::PositionId;
    use chrono::TimeZone;

    fn marker(device: i64, geofence: i64, position: i64, kind: MarkerType) -> DistanceMarker {
        DistanceMarker {
            device_id: DeviceId(device),
            geofence_id: GeofenceId(geofence),
            position_id: PositionId(position),
            marker_type: kind,
            total_distance: position as f64 * 100.0,
            fix_time: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, position as u32).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_query_filters_and_sorts() {
        let store = MemoryMarkerStore::new();
        store
            .append(&[
                marker(1, 9, 3, MarkerType::Enter),
                marker(1, 9, 1, MarkerType::Enter),
                marker(2, 9, 2, MarkerType::Exit),
                marker(1, 4, 2, MarkerType::Exit),
            ])
            .await
            .unwrap();

        let result = store.query(Some(DeviceId(1)), Some(GeofenceId(9)), None, None).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].position_id, PositionId(1));
        assert_eq!(result[1].position_id, PositionId(3));
    }

    #[tokio::test]
    async fn test_memory_store_time_range() {
        let store = MemoryMarkerStore::new();
        store
            .append(&[marker(1, 9, 1, MarkerType::Enter), marker(1, 9, 30, MarkerType::Exit)])
            .await
            .unwrap();

        let from = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 10).unwrap();
        let result = store.query(Some(DeviceId(1)), None, Some(from), None).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].position_id, PositionId(30));
    }

    #[tokio::test]
    async fn test_jsonl_store_append_then_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.jsonl");
        let store = JsonlMarkerStore::new(path.to_str().unwrap());

        store
            .append(&[
                marker(1, 9, 3, MarkerType::Exit),
                marker(1, 9, 1, MarkerType::Enter),
                marker(2, 9, 2, MarkerType::Enter),
            ])
            .await
            .unwrap();

        let result = store.query(Some(DeviceId(1)), Some(GeofenceId(9)), None, None).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].position_id, PositionId(1));
        assert_eq!(result[0].marker_type, MarkerType::Enter);
        assert_eq!(result[1].position_id, PositionId(3));

        // One JSON object per line on disk.
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_jsonl_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing-yet.jsonl");
        let store = JsonlMarkerStore::new(path.to_str().unwrap());

        let result = store.query(None, None, None, None).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_store_appends_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("markers.jsonl");

        let first = JsonlMarkerStore::new(path.to_str().unwrap());
        first.append(&[marker(1, 9, 1, MarkerType::Enter)]).await.unwrap();

        let second = JsonlMarkerStore::new(path.to_str().unwrap());
        second.append(&[marker(1, 9, 2, MarkerType::Exit)]).await.unwrap();

        let result = second.query(None, None, None, None).await.unwrap();
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn test_jsonl_store_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.jsonl");
        let store = JsonlMarkerStore::new(path.to_str().unwrap());

        store.append(&[marker(1, 9, 1, MarkerType::Enter)]).await.unwrap();
        store.append_line("not a marker").unwrap();
        store.append(&[marker(1, 9, 2, MarkerType::Exit)]).await.unwrap();

        let result = store.query(None, None, None, None).await.unwrap();
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        use crate::domain::position::Position;
        use crate::domain::EventType;

        let sink = CollectingEventSink::new();
        let position = Position::new(
            DeviceId(1),
            PositionId(1),
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        );
        sink.emit(Event::new(EventType::SpeedCamera, &position)).await;

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].event_type, EventType::SpeedCamera);
    }
}
