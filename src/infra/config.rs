//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_url")]
    pub url: String,
    /// Liveness probe interval (seconds)
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Bound on every remote cache call
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    /// TTL applied to state writes; 0 keeps state until overwritten
    #[serde(default)]
    pub state_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            url: default_cache_url(),
            probe_interval_secs: default_probe_interval_secs(),
            op_timeout_ms: default_op_timeout_ms(),
            state_ttl_secs: 0,
        }
    }
}

fn default_cache_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_op_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorsSection {
    /// Confidence window shared by the toll counters
    #[serde(default = "default_toll_window")]
    pub toll_minimal_duration: u32,
    #[serde(default = "default_surface_window")]
    pub surface_window: u32,
    /// Comma-separated surfaces that may alert (case-insensitive)
    #[serde(default)]
    pub surface_alert_types: String,
    #[serde(default = "default_speed_camera_window")]
    pub speed_camera_window: u32,
    /// Comma-separated highway tags eligible for speed camera checks
    #[serde(default = "default_speed_camera_highways")]
    pub speed_camera_highways: String,
    /// Comma-separated detector names to run; empty runs all of them
    #[serde(default)]
    pub enabled: String,
}

impl Default for DetectorsSection {
    fn default() -> Self {
        Self {
            toll_minimal_duration: default_toll_window(),
            surface_window: default_surface_window(),
            surface_alert_types: String::new(),
            speed_camera_window: default_speed_camera_window(),
            speed_camera_highways: default_speed_camera_highways(),
            enabled: String::new(),
        }
    }
}

fn default_toll_window() -> u32 {
    3
}

fn default_surface_window() -> u32 {
    4
}

fn default_speed_camera_window() -> u32 {
    1
}

fn default_speed_camera_highways() -> String {
    "motorway_link".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Shard worker count; positions are routed by deviceId % shards
    #[serde(default = "default_shards")]
    pub shards: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self { shards: default_shards(), queue_depth: default_queue_depth() }
    }
}

fn default_shards() -> usize {
    4
}

fn default_queue_depth() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestSection {
    /// File path for position ingest (JSONL format)
    #[serde(default = "default_ingest_file")]
    pub file: String,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self { file: default_ingest_file() }
    }
}

fn default_ingest_file() -> String {
    "positions.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressSection {
    /// File path for event egress (JSONL format)
    #[serde(default = "default_egress_file")]
    pub file: String,
    /// File path for raw distance markers (JSONL format)
    #[serde(default = "default_markers_file")]
    pub markers_file: String,
    /// File path for reconstructed distance segments (JSONL format)
    #[serde(default = "default_segments_file")]
    pub segments_file: String,
}

impl Default for EgressSection {
    fn default() -> Self {
        Self {
            file: default_egress_file(),
            markers_file: default_markers_file(),
            segments_file: default_segments_file(),
        }
    }
}

fn default_egress_file() -> String {
    "events.jsonl".to_string()
}

fn default_markers_file() -> String {
    "markers.jsonl".to_string()
}

fn default_segments_file() -> String {
    "segments.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RefdataSection {
    /// JSON file with devices/groups/geofences/calendars; empty loads nothing
    #[serde(default)]
    pub file: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub detectors: DetectorsSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub egress: EgressSection,
    #[serde(default)]
    pub refdata: RefdataSection,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    cache_url: String,
    cache_probe_interval_secs: u64,
    cache_op_timeout_ms: u64,
    state_ttl_secs: u64,
    toll_minimal_duration: u32,
    surface_window: u32,
    surface_alert_types: String,
    speed_camera_window: u32,
    speed_camera_highways: String,
    detectors_enabled: String,
    shards: usize,
    queue_depth: usize,
    ingest_file: String,
    egress_file: String,
    markers_file: String,
    segments_file: String,
    refdata_file: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            cache_url: toml_config.cache.url,
            cache_probe_interval_secs: toml_config.cache.probe_interval_secs,
            cache_op_timeout_ms: toml_config.cache.op_timeout_ms,
            state_ttl_secs: toml_config.cache.state_ttl_secs,
            toll_minimal_duration: toml_config.detectors.toll_minimal_duration,
            surface_window: toml_config.detectors.surface_window,
            surface_alert_types: toml_config.detectors.surface_alert_types,
            speed_camera_window: toml_config.detectors.speed_camera_window,
            speed_camera_highways: toml_config.detectors.speed_camera_highways,
            detectors_enabled: toml_config.detectors.enabled,
            shards: toml_config.pipeline.shards,
            queue_depth: toml_config.pipeline.queue_depth,
            ingest_file: toml_config.ingest.file,
            egress_file: toml_config.egress.file,
            markers_file: toml_config.egress.markers_file,
            segments_file: toml_config.egress.segments_file,
            refdata_file: toml_config.refdata.file,
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        let config_path = Self::resolve_config_path(args);

        match Self::from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn cache_url(&self) -> &str {
        &self.cache_url
    }

    pub fn cache_probe_interval_secs(&self) -> u64 {
        self.cache_probe_interval_secs
    }

    pub fn cache_op_timeout_ms(&self) -> u64 {
        self.cache_op_timeout_ms
    }

    pub fn state_ttl_secs(&self) -> u64 {
        self.state_ttl_secs
    }

    pub fn toll_minimal_duration(&self) -> u32 {
        self.toll_minimal_duration
    }

    pub fn surface_window(&self) -> u32 {
        self.surface_window
    }

    pub fn surface_alert_types(&self) -> &str {
        &self.surface_alert_types
    }

    pub fn speed_camera_window(&self) -> u32 {
        self.speed_camera_window
    }

    pub fn speed_camera_highways(&self) -> &str {
        &self.speed_camera_highways
    }

    /// True when the named detector should run. An empty list enables all.
    pub fn detector_enabled(&self, name: &str) -> bool {
        let list = self.detectors_enabled.trim();
        if list.is_empty() {
            return true;
        }
        list.split(',').any(|entry| entry.trim().eq_ignore_ascii_case(name))
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    pub fn ingest_file(&self) -> &str {
        &self.ingest_file
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn markers_file(&self) -> &str {
        &self.markers_file
    }

    pub fn segments_file(&self) -> &str {
        &self.segments_file
    }

    pub fn refdata_file(&self) -> &str {
        &self.refdata_file
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
