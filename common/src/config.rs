use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which device the frame source opens. Selected at runtime from the
/// `[camera.source]` table, e.g. `source = { kind = "usb", index = 0 }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSelector {
    /// USB-class camera, opened as `/dev/video{index}`.
    Usb { index: u32 },
    /// GStreamer pipeline description ending in an `appsink`
    /// (CSI/libcamera-class sources).
    Pipeline { descriptor: String },
    /// Generated test pattern; needs no hardware.
    Synthetic,
}

impl Default for SourceSelector {
    fn default() -> Self {
        SourceSelector::Usb { index: 0 }
    }
}

impl std::fmt::Display for SourceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSelector::Usb { index } => write!(f, "usb:{index}"),
            SourceSelector::Pipeline { descriptor } => write!(f, "pipeline:{descriptor}"),
            SourceSelector::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// Capture hints. The device may clamp or ignore width, height and fps.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub source: SourceSelector,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Stale frames discarded before every read.
    #[serde(default = "default_flush_frames")]
    pub flush_frames: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: SourceSelector::default(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            flush_frames: default_flush_frames(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Sent as `Authorization: Bearer <token>` when set.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            jpeg_quality: default_jpeg_quality(),
            bearer_token: None,
        }
    }
}

impl UploadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Delay after every completed upload attempt.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Delay after a failed read or encode.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
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
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the device or the uploader unusable.
    /// Runs before the camera is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let camera = &self.camera;
        if camera.width == 0 || camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera resolution must be non-zero, got {}x{}",
                camera.width, camera.height
            )));
        }
        if camera.fps == 0 {
            return Err(ConfigError::Invalid("camera.fps must be non-zero".into()));
        }
        if let SourceSelector::Pipeline { descriptor } = &camera.source {
            if descriptor.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "camera.source.descriptor must not be empty".into(),
                ));
            }
            if !descriptor.contains("appsink") {
                return Err(ConfigError::Invalid(
                    "camera.source.descriptor must end in an appsink element".into(),
                ));
            }
        }

        let upload = &self.upload;
        let endpoint = url::Url::parse(&upload.endpoint)
            .map_err(|e| ConfigError::Invalid(format!("upload.endpoint: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "upload.endpoint must be http or https, got {}",
                endpoint.scheme()
            )));
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&upload.timeout_secs) {
            return Err(ConfigError::Invalid(format!(
                "upload.timeout_secs must be within {MIN_TIMEOUT_SECS}..={MAX_TIMEOUT_SECS}, got {}",
                upload.timeout_secs
            )));
        }
        if upload.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "upload.jpeg_quality must be within 0..=100, got {}",
                upload.jpeg_quality
            )));
        }
        if upload.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("upload.user_agent must not be empty".into()));
        }
        if matches!(&upload.bearer_token, Some(t) if t.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "upload.bearer_token is set but empty".into(),
            ));
        }

        if self.schedule.interval_secs == 0 || self.schedule.retry_delay_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule intervals must be non-zero".into(),
            ));
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
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub const MIN_TIMEOUT_SECS: u64 = 20;
pub const MAX_TIMEOUT_SECS: u64 = 30;

// Default value functions
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_fps() -> u32 {
    30
}
fn default_flush_frames() -> u32 {
    3
}
fn default_endpoint() -> String {
    "https://coffee-maker.apifortytwo.com/api/observation".into()
}
fn default_user_agent() -> String {
    "coffee-rpi/1.0".into()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_interval_secs() -> u64 {
    20
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".into()
}
