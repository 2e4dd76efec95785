//! Position ingest - reads a JSONL position feed
//!
//! One position per line. Lines that fail to parse are logged and skipped;
//! a malformed sample must not stop the feed. Per-device ordering is the
//! file order, preserved by the pipeline's sharding.

use crate::domain::Position;
use crate::services::pipeline::Pipeline;
use anyhow::Context;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

pub struct PositionIngest {
    file_path: String,
}

impl PositionIngest {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "ingest_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Feed every parseable position into the pipeline. Returns the number
    /// of positions submitted.
    pub async fn run(&self, pipeline: &Pipeline) -> anyhow::Result<usize> {
        let file = tokio::fs::File::open(Path::new(&self.file_path))
            .await
            .with_context(|| format!("failed to open position feed {}", self.file_path))?;
        let mut lines = BufReader::new(file).lines();

        let mut submitted = 0usize;
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let position: Position = match serde_json::from_str(&line) {
                Ok(position) => position,
                Err(e) => {
                    warn!(line = %line_no, error = %e, "position_parse_failed");
                    continue;
                }
            };

            pipeline.submit(position).await?;
            submitted += 1;
        }

        info!(positions = %submitted, "ingest_completed");
        Ok(submitted)
    }
}
