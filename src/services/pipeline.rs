//! Sharded position pipeline
//!
//! Every detector does a non-atomic read-modify-write on per-device cached
//! state, so two positions for one device must never run concurrently.
//! Positions are routed to a fixed shard by `device_id % shards`: one device
//! always lands on the same worker and is processed in arrival order, while
//! unrelated devices run in parallel.
//!
//! A detector failure is impossible by construction (detectors return
//! events, never errors); a slow cache is bounded by the cache timeout.

use crate::domain::{DeviceId, Position};
use crate::io::sinks::EventSink;
use crate::services::detectors::EventDetector;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle for submitting positions to the shard workers
pub struct Pipeline {
    shards: Vec<mpsc::Sender<Position>>,
}

impl Pipeline {
    /// Route one position to its device's shard. Fails only when the
    /// pipeline has shut down.
    pub async fn submit(&self, position: Position) -> anyhow::Result<()> {
        let shard = Self::shard_for(position.device_id, self.shards.len());
        self.shards[shard]
            .send(position)
            .await
            .map_err(|_| anyhow::anyhow!("pipeline shard {} closed", shard))
    }

    fn shard_for(device_id: DeviceId, shards: usize) -> usize {
        (device_id.0.unsigned_abs() as usize) % shards
    }
}

struct ShardWorker {
    shard: usize,
    rx: mpsc::Receiver<Position>,
    detectors: Arc<Vec<Box<dyn EventDetector>>>,
    sink: Arc<dyn EventSink>,
}

impl ShardWorker {
    async fn run(mut self) {
        info!(shard = %self.shard, "pipeline_worker_started");

        while let Some(position) = self.rx.recv().await {
            debug!(
                shard = %self.shard,
                device_id = %position.device_id,
                position_id = %position.id,
                "position_processing"
            );

            for detector in self.detectors.iter() {
                let events = detector.on_position(&position).await;
                for event in events {
                    debug!(
                        detector = %detector.name(),
                        device_id = %event.device_id,
                        event_type = %event.event_type.as_str(),
                        "event_detected"
                    );
                    self.sink.emit(event).await;
                }
            }
        }

        info!(shard = %self.shard, "pipeline_worker_stopped");
    }
}

/// Create the shard channels and spawn one worker per shard.
///
/// Dropping the returned `Pipeline` closes the channels; the workers drain
/// their queues and exit.
pub fn create_pipeline(
    detectors: Arc<Vec<Box<dyn EventDetector>>>,
    sink: Arc<dyn EventSink>,
    shards: usize,
    queue_depth: usize,
) -> (Pipeline, Vec<JoinHandle<()>>) {
    let shards = shards.max(1);
    let queue_depth = queue_depth.max(1);

    let mut senders = Vec::with_capacity(shards);
    let mut handles = Vec::with_capacity(shards);

    for shard in 0..shards {
        let (tx, rx) = mpsc::channel(queue_depth);
        let worker =
            ShardWorker { shard, rx, detectors: detectors.clone(), sink: sink.clone() };
        senders.push(tx);
        handles.push(tokio::spawn(worker.run()));
    }

    if detectors.is_empty() {
        warn!("pipeline_started_without_detectors");
    }
    info!(shards = %shards, queue_depth = %queue_depth, "pipeline_started");

    (Pipeline { shards: senders }, handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{DeviceId, PositionId};
    use crate::domain::{Event, EventType};
    use crate::io::sinks::CollectingEventSink;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    /// Emits one event per position, tagged with the observed order.
    struct SequenceDetector;

    #[async_trait]
    impl EventDetector for SequenceDetector {
        fn name(&self) -> &'static str {
            "sequence"
        }

        async fn on_position(&self, position: &Position) -> Vec<Event> {
            vec![Event::new(EventType::SpeedCamera, position)
                .with("positionId", position.id.0)]
        }
    }

    fn position(device: i64, id: i64) -> Position {
        Position::new(
            DeviceId(device),
            PositionId(id),
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_same_device_maps_to_same_shard() {
        for shards in [1, 2, 4, 7] {
            let a = Pipeline::shard_for(DeviceId(42), shards);
            let b = Pipeline::shard_for(DeviceId(42), shards);
            assert_eq!(a, b);
            assert!(a < shards);
        }
    }

    #[tokio::test]
    async fn test_per_device_order_preserved() {
        let detectors: Arc<Vec<Box<dyn EventDetector>>> =
            Arc::new(vec![Box::new(SequenceDetector)]);
        let sink = Arc::new(CollectingEventSink::new());
        let (pipeline, handles) = create_pipeline(detectors, sink.clone(), 4, 16);

        for id in 1..=20 {
            pipeline.submit(position(7, id)).await.unwrap();
        }

        drop(pipeline);
        for handle in handles {
            handle.await.unwrap();
        }

        let observed: Vec<i64> =
            sink.events().iter().map(|e| e.attr_f64("positionId").unwrap() as i64).collect();
        assert_eq!(observed, (1..=20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_all_devices_processed() {
        let detectors: Arc<Vec<Box<dyn EventDetector>>> =
            Arc::new(vec![Box::new(SequenceDetector)]);
        let sink = Arc::new(CollectingEventSink::new());
        let (pipeline, handles) = create_pipeline(detectors, sink.clone(), 3, 16);

        for device in 1..=9 {
            pipeline.submit(position(device, device)).await.unwrap();
        }

        drop(pipeline);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(sink.len(), 9);
    }

    #[tokio::test]
    async fn test_zero_shards_clamped() {
        let detectors: Arc<Vec<Box<dyn EventDetector>>> = Arc::new(vec![]);
        let sink = Arc::new(CollectingEventSink::new());
        let (pipeline, handles) = create_pipeline(detectors, sink, 0, 0);

        pipeline.submit(position(1, 1)).await.unwrap();
        drop(pipeline);
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
