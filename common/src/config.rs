use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub snapshots: SnapshotConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Yuy2,
    Mjpeg,
    Rgb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_name")]
    pub name: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_format")]
    pub format: PixelFormat,
    /// Requested frame rate. When unset, the camera's maximum for the
    /// format and resolution is used.
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default = "default_open_timeout")]
    pub open_timeout_secs: u64,
    #[serde(default = "default_configure_timeout")]
    pub configure_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub left: u32,
    #[serde(default = "default_right")]
    pub right: u32,
    #[serde(default = "default_crop_top")]
    pub crop_top: u32,
    #[serde(default = "default_crop_height")]
    pub crop_height: u32,
    /// A half of the crop holding more marker pixels than this is
    /// considered to show a visible marker.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_snapshot_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_snapshot_quality")]
    pub quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_replay_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_replay_fps")]
    pub fps: f64,
    #[serde(default = "default_loop_playback")]
    pub loop_playback: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: default_camera_name(),
            width: default_width(),
            height: default_height(),
            format: default_format(),
            fps: None,
            open_timeout_secs: default_open_timeout(),
            configure_timeout_secs: default_configure_timeout(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            left: 0,
            right: default_right(),
            crop_top: default_crop_top(),
            crop_height: default_crop_height(),
            threshold: default_threshold(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_snapshot_dir(),
            quality: default_snapshot_quality(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            dir: default_replay_dir(),
            fps: default_replay_fps(),
            loop_playback: default_loop_playback(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config
            .detector
            .validate(config.camera.width, config.camera.height)?;
        Ok(config)
    }
}

impl CameraConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn configure_timeout(&self) -> Duration {
        Duration::from_secs(self.configure_timeout_secs)
    }
}

impl DetectorConfig {
    /// Crop bounds `[left, right)`, with the default vertical band.
    pub fn with_bounds(left: u32, right: u32) -> Self {
        Self {
            left,
            right,
            ..Self::default()
        }
    }

    pub fn crop_width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    /// Check the crop rectangle against a `width` x `height` frame.
    pub fn validate(&self, width: u32, height: u32) -> Result<(), ConfigError> {
        let bottom = self.crop_top.checked_add(self.crop_height);
        let crop_ok = self.right > self.left
            && self.right <= width
            && self.crop_height > 0
            && bottom.is_some_and(|b| b <= height);
        if !crop_ok {
            return Err(ConfigError::InvalidCrop {
                left: self.left,
                right: self.right,
                top: self.crop_top,
                height: self.crop_height,
                frame_width: width,
                frame_height: height,
            });
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error(
        "crop [{left}, {right}) x [{top}, +{height}) does not fit a {frame_width}x{frame_height} frame"
    )]
    InvalidCrop {
        left: u32,
        right: u32,
        top: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("frame buffer capacity must be at least 1")]
    InvalidCapacity,
}

// Default value functions
fn default_camera_name() -> String {
    "Webcam 1".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_format() -> PixelFormat {
    PixelFormat::Yuy2
}
fn default_open_timeout() -> u64 {
    10
}
fn default_configure_timeout() -> u64 {
    10
}
fn default_right() -> u32 {
    640
}
fn default_crop_top() -> u32 {
    120
}
fn default_crop_height() -> u32 {
    240
}
fn default_threshold() -> u32 {
    500
}
fn default_buffer_capacity() -> usize {
    2
}
fn default_snapshot_dir() -> PathBuf {
    "robot-data".into()
}
fn default_snapshot_quality() -> u8 {
    100
}
fn default_replay_dir() -> PathBuf {
    "frames".into()
}
fn default_replay_fps() -> f64 {
    10.0
}
fn default_loop_playback() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    50
}
fn default_log_level() -> String {
    "info".into()
}
