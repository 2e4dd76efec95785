//! Fleet events - vehicle telemetry event detection engine
//!
//! Reads a normalized position feed, runs the stateful detectors over it and
//! writes the resulting events as JSONL.
//!
//! Module structure:
//! - `domain/` - Core types (Position, Event, markers, reference data)
//! - `io/` - External interfaces (ingest, egress, sinks)
//! - `services/` - Detection logic (debounce, detectors, segments, pipeline)
//! - `infra/` - Infrastructure (Config, resilient cache)

use clap::Parser;
use fleet_events::domain::refdata::ReferenceStore;
use fleet_events::infra::{Config, LocalCache, ResilientCache, StateStore};
use fleet_events::io::{
    write_segments, ChannelEventSink, EventEgress, JsonlMarkerStore, MarkerStore, PositionIngest,
};
use fleet_events::services::detectors::{
    EventDetector, GeofenceDetector, RegionDetector, SpeedCameraDetector, SurfaceDetector,
    TollDetector,
};
use fleet_events::services::pipeline::create_pipeline;
use fleet_events::services::reconstruct_segments;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Fleet events - telemetry event detection engine
#[derive(Parser, Debug)]
#[command(name = "fleet-events", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "fleet-events starting");

    let args = Args::parse();
    let config_path =
        args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load(&["--config".to_string(), config_path]);

    info!(
        config_file = %config.config_file(),
        cache_url = %config.cache_url(),
        toll_minimal_duration = %config.toll_minimal_duration(),
        surface_window = %config.surface_window(),
        speed_camera_window = %config.speed_camera_window(),
        shards = %config.shards(),
        ingest_file = %config.ingest_file(),
        egress_file = %config.egress_file(),
        markers_file = %config.markers_file(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Connect the remote cache; failure is non-fatal, the probe keeps trying
    let cache = ResilientCache::connect(
        config.cache_url(),
        Duration::from_millis(config.cache_op_timeout_ms()),
    )
    .await;
    let probe_handle = cache.spawn_probe(
        Duration::from_secs(config.cache_probe_interval_secs()),
        shutdown_rx,
    );

    let store =
        StateStore::new(cache.clone(), LocalCache::new(), config.state_ttl_secs());

    // Reference data is owned externally; loaded once at startup. A load
    // failure degrades to an empty store rather than refusing to run.
    let refs = if config.refdata_file().is_empty() {
        Arc::new(ReferenceStore::new())
    } else {
        match ReferenceStore::from_file(config.refdata_file()) {
            Ok(store) => {
                info!(file = %config.refdata_file(), entries = %store.len(), "refdata_loaded");
                Arc::new(store)
            }
            Err(e) => {
                warn!(file = %config.refdata_file(), error = %e, "refdata_load_failed");
                Arc::new(ReferenceStore::new())
            }
        }
    };
    let markers = Arc::new(JsonlMarkerStore::new(config.markers_file()));

    let mut detectors: Vec<Box<dyn EventDetector>> = Vec::new();
    if config.detector_enabled("geofence") {
        detectors.push(Box::new(GeofenceDetector::new(
            store.clone(),
            refs.clone(),
            markers.clone(),
        )));
    }
    if config.detector_enabled("toll") {
        detectors.push(Box::new(TollDetector::new(
            store.clone(),
            refs.clone(),
            config.toll_minimal_duration(),
        )));
    }
    if config.detector_enabled("speed_camera") {
        detectors.push(Box::new(SpeedCameraDetector::new(
            store.clone(),
            config.speed_camera_window(),
            config.speed_camera_highways(),
        )));
    }
    if config.detector_enabled("surface") {
        detectors.push(Box::new(SurfaceDetector::new(
            store.clone(),
            config.surface_window(),
            config.surface_alert_types(),
        )));
    }
    if config.detector_enabled("region") {
        detectors.push(Box::new(RegionDetector::new(store.clone())));
    }
    info!(detectors = %detectors.len(), "detectors_configured");
    let detectors = Arc::new(detectors);

    // Event channel (bounded for backpressure) feeding the egress writer
    let (event_tx, event_rx) = mpsc::channel(1000);
    let egress = EventEgress::new(config.egress_file());
    let writer = tokio::spawn(egress.run(event_rx));

    let sink = Arc::new(ChannelEventSink::new(event_tx));
    let (pipeline, workers) =
        create_pipeline(detectors, sink, config.shards(), config.queue_depth());

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Feed the position file; dropping the pipeline lets the workers drain
    let ingest = PositionIngest::new(config.ingest_file());
    let submitted = ingest.run(&pipeline).await?;
    drop(pipeline);

    for worker in workers {
        worker.await?;
    }
    let written = writer.await?;
    probe_handle.abort();

    // Rebuild inside/outside segments from the accumulated marker history
    let history = markers.query(None, None, None, None).await?;
    let segments = reconstruct_segments(&history);
    let segment_count = write_segments(config.segments_file(), &segments)?;
    info!(markers = %history.len(), segments = %segment_count, "segments_reconstructed");

    info!(positions = %submitted, events = %written, "fleet-events shutdown complete");
    Ok(())
}
