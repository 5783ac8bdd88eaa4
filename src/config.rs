use crate::frame::FrameGeometry;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkerConfig {
    pub server: ServerConfig,
    pub media: MediaConfig,
    pub analysis: AnalysisConfig,
    pub alerts: AlertConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MediaConfig {
    /// Path to the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// RTSP transport used for both pulling and publishing
    #[serde(default = "default_rtsp_transport")]
    pub rtsp_transport: String,

    /// Base URL of the publish endpoint; the camera id is appended as the path
    #[serde(default = "default_publish_base_url")]
    pub publish_base_url: String,

    /// Path suffix for the annotated analysis output
    #[serde(default = "default_annotated_suffix")]
    pub annotated_suffix: String,

    /// ffmpeg `-loglevel`
    #[serde(default = "default_ffmpeg_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisConfig {
    /// Raw frame width in pixels
    #[serde(default = "default_frame_width")]
    pub width: u32,

    /// Raw frame height in pixels
    #[serde(default = "default_frame_height")]
    pub height: u32,

    /// Bytes per pixel of the raw stream (BGR24 = 3)
    #[serde(default = "default_channel_depth")]
    pub channels: u32,

    /// Sampling rate enforced by the decode process
    #[serde(default = "default_sample_fps")]
    pub fps: u32,

    /// Re-encode and publish frames with detections drawn on them
    #[serde(default = "default_annotate_output")]
    pub annotate_output: bool,

    /// Delta threshold for motion detection
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: u8,

    /// Minimum region area in pixels for a detection
    #[serde(default = "default_min_region_area")]
    pub min_region_area: u32,

    /// Optional grayscale region-of-interest mask; must exist and match the frame size
    #[serde(default)]
    pub mask_path: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlertConfig {
    /// Backend endpoint receiving alert POSTs
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Directory snapshots are written to
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,

    /// URL prefix under which snapshots are referenced in alerts
    #[serde(default = "default_snapshot_url_prefix")]
    pub snapshot_url_prefix: String,

    /// JPEG quality for snapshots
    #[serde(default = "default_snapshot_quality")]
    pub snapshot_quality: u8,

    /// Timeout for a single sink request in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Minimum seconds between alerts of one session (0 disables suppression)
    #[serde(default)]
    pub suppression_window_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SupervisorConfig {
    /// Time a process gets to exit after SIGTERM before it is killed
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Time teardown waits for in-flight alert dispatches before abandoning them
    #[serde(default = "default_dispatch_drain_ms")]
    pub dispatch_drain_ms: u64,
}

impl AnalysisConfig {
    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width, self.height, self.channels)
    }
}

impl AlertConfig {
    pub fn suppression_window(&self) -> Option<Duration> {
        (self.suppression_window_secs > 0)
            .then(|| Duration::from_secs(self.suppression_window_secs))
    }
}

impl SupervisorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn dispatch_drain(&self) -> Duration {
        Duration::from_millis(self.dispatch_drain_ms)
    }
}

impl WorkerConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("camworker.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let mut builder = Config::builder()
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port())?
            .set_default("media.ffmpeg_path", default_ffmpeg_path())?
            .set_default("media.rtsp_transport", default_rtsp_transport())?
            .set_default("media.publish_base_url", default_publish_base_url())?
            .set_default("media.annotated_suffix", default_annotated_suffix())?
            .set_default("media.log_level", default_ffmpeg_log_level())?
            .set_default("analysis.width", default_frame_width())?
            .set_default("analysis.height", default_frame_height())?
            .set_default("analysis.channels", default_channel_depth())?
            .set_default("analysis.fps", default_sample_fps())?
            .set_default("analysis.annotate_output", default_annotate_output())?
            .set_default("analysis.delta_threshold", default_delta_threshold() as i64)?
            .set_default("analysis.min_region_area", default_min_region_area())?
            .set_default("alerts.backend_url", default_backend_url())?
            .set_default("alerts.snapshot_dir", default_snapshot_dir())?
            .set_default("alerts.snapshot_url_prefix", default_snapshot_url_prefix())?
            .set_default("alerts.snapshot_quality", default_snapshot_quality() as i64)?
            .set_default("alerts.request_timeout_secs", default_request_timeout())?
            .set_default("alerts.suppression_window_secs", 0)?
            .set_default("supervisor.grace_period_ms", default_grace_period_ms())?
            .set_default("supervisor.dispatch_drain_ms", default_dispatch_drain_ms())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with CAMWORKER_ prefix
            .add_source(Environment::with_prefix("CAMWORKER").separator("__"));

        // Plain variables set by container deployments
        if let Ok(port) = std::env::var("PORT") {
            builder = builder.set_override("server.port", port)?;
        }
        if let Ok(url) = std::env::var("BACKEND_URL") {
            builder = builder.set_override("alerts.backend_url", url)?;
        }

        let config: WorkerConfig = builder.build()?.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analysis.width == 0 || self.analysis.height == 0 {
            return Err(ConfigError::Message(
                "Analysis resolution must be greater than 0".to_string(),
            ));
        }

        if self.analysis.channels == 0 {
            return Err(ConfigError::Message(
                "Analysis channel depth must be greater than 0".to_string(),
            ));
        }

        if self.analysis.fps == 0 {
            return Err(ConfigError::Message(
                "Analysis fps must be greater than 0".to_string(),
            ));
        }

        if self.media.ffmpeg_path.trim().is_empty() {
            return Err(ConfigError::Message(
                "Media ffmpeg_path must not be empty".to_string(),
            ));
        }

        if self.alerts.backend_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "Alert backend_url must not be empty".to_string(),
            ));
        }

        if self.alerts.snapshot_quality == 0 || self.alerts.snapshot_quality > 100 {
            return Err(ConfigError::Message(
                "Snapshot quality must be between 1 and 100".to_string(),
            ));
        }

        if self.supervisor.grace_period_ms == 0 {
            return Err(ConfigError::Message(
                "Supervisor grace_period_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
            },
            media: MediaConfig {
                ffmpeg_path: default_ffmpeg_path(),
                rtsp_transport: default_rtsp_transport(),
                publish_base_url: default_publish_base_url(),
                annotated_suffix: default_annotated_suffix(),
                log_level: default_ffmpeg_log_level(),
            },
            analysis: AnalysisConfig {
                width: default_frame_width(),
                height: default_frame_height(),
                channels: default_channel_depth(),
                fps: default_sample_fps(),
                annotate_output: default_annotate_output(),
                delta_threshold: default_delta_threshold(),
                min_region_area: default_min_region_area(),
                mask_path: None,
            },
            alerts: AlertConfig {
                backend_url: default_backend_url(),
                snapshot_dir: default_snapshot_dir(),
                snapshot_url_prefix: default_snapshot_url_prefix(),
                snapshot_quality: default_snapshot_quality(),
                request_timeout_secs: default_request_timeout(),
                suppression_window_secs: 0,
            },
            supervisor: SupervisorConfig {
                grace_period_ms: default_grace_period_ms(),
                dispatch_drain_ms: default_dispatch_drain_ms(),
            },
        }
    }
}

// Default value functions
fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8080
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_rtsp_transport() -> String {
    "tcp".to_string()
}
fn default_publish_base_url() -> String {
    "rtsp://skylark-mediamtx:8554".to_string()
}
fn default_annotated_suffix() -> String {
    "_annotated".to_string()
}
fn default_ffmpeg_log_level() -> String {
    "error".to_string()
}

fn default_frame_width() -> u32 {
    640
}
fn default_frame_height() -> u32 {
    480
}
fn default_channel_depth() -> u32 {
    3
}
fn default_sample_fps() -> u32 {
    2
}
fn default_annotate_output() -> bool {
    false
}
fn default_delta_threshold() -> u8 {
    25
}
fn default_min_region_area() -> u32 {
    1000
}

fn default_backend_url() -> String {
    "http://backend:3000/api/alerts".to_string()
}
fn default_snapshot_dir() -> String {
    "/snapshots".to_string()
}
fn default_snapshot_url_prefix() -> String {
    "/snapshots".to_string()
}
fn default_snapshot_quality() -> u8 {
    90
}
fn default_request_timeout() -> u64 {
    10
}

fn default_grace_period_ms() -> u64 {
    5000
}
fn default_dispatch_drain_ms() -> u64 {
    2000
}
