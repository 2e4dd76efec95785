//! Event egress - writes detected events to file
//!
//! Events are written in JSONL format (one JSON object per line) to the
//! file specified in config. Write failures are logged and skipped; the
//! stream continues.

use crate::domain::marker::DistanceSegment;
use crate::domain::Event;
use anyhow::Context;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Egress writer for detected events
pub struct EventEgress {
    file_path: String,
}

impl EventEgress {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "egress_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write one event to the egress file.
    /// Returns true if successful, false otherwise
    pub fn write_event(&self, event: &Event) -> bool {
        let json = event.to_json();

        match self.append_line(&json) {
            Ok(()) => {
                info!(
                    event_id = %event.id,
                    event_type = %event.event_type.as_str(),
                    device_id = %event.device_id,
                    "event_egressed"
                );
                true
            }
            Err(e) => {
                error!(
                    event_id = %event.id,
                    error = %e,
                    "event_egress_failed"
                );
                false
            }
        }
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
        debug!(file = %self.file_path, bytes = %line.len(), "egress_written");

        Ok(())
    }

    /// Drain the event channel until it closes, writing each event.
    pub async fn run(self, mut rx: mpsc::Receiver<Event>) -> usize {
        let mut written = 0;
        while let Some(event) = rx.recv().await {
            if self.write_event(&event) {
                written += 1;
            }
        }
        info!(events = %written, "egress_drained");
        written
    }
}

/// Overwrite the segments file with one JSON line per segment.
///
/// Segments are derived data, reconstructed wholesale from the marker
/// history, so the file is replaced rather than appended to.
pub fn write_segments(file_path: &str, segments: &[DistanceSegment]) -> anyhow::Result<usize> {
    let path = Path::new(file_path);

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let mut out = String::new();
    for segment in segments {
        out.push_str(&serde_json::to_string(segment)?);
        out.push('\n');
    }
    std::fs::write(path, out)
        .with_context(|| format!("Failed to write segments file {}", file_path))?;

    info!(file = %file_path, segments = %segments.len(), "segments_written");
    Ok(segments.len())
}
