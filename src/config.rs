//! Daemon configuration.
//!
//! Configuration comes from a JSON file with nested sections. Every key
//! has an explicit default, so a missing key never fails; a missing or
//! unreadable *file* is fatal at startup. A small set of environment
//! variables override the file after parsing.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "shared/config.json";
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_BUFFER_SIZE: u32 = 1;
const DEFAULT_INPUT_SIZE: [u32; 2] = [640, 640];
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_IOU_THRESHOLD: f32 = 0.5;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_SERVER_PORT: u16 = 5100;
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_METRICS_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    server: Option<ServerConfigFile>,
    logging: Option<LoggingConfigFile>,
    performance: Option<PerformanceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    buffer_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    model_path: Option<Vec<PathBuf>>,
    labels_path: Option<PathBuf>,
    input_size: Option<[u32; 2]>,
    confidence_threshold: Option<f32>,
    nms_iou_threshold: Option<f32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
struct LoggingConfigFile {
    path: Option<PathBuf>,
    metrics_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PerformanceConfigFile {
    use_acceleration: Option<bool>,
}

/// Resolved daemon configuration with all defaults applied.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub server_port: u16,
    pub log_dir: PathBuf,
    pub metrics_interval_ms: u64,
    pub use_acceleration: bool,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_size: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// Model graph file, optionally followed by a separate weights file
    /// for split-format models.
    pub model_path: Vec<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_size: [u32; 2],
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub jpeg_quality: u8,
}

impl AppConfig {
    /// Load configuration. Path resolution: explicit argument, then the
    /// SIGNWATCH_CONFIG environment variable, then `shared/config.json`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("SIGNWATCH_CONFIG").ok().map(PathBuf::from);
        let resolved = path
            .map(Path::to_path_buf)
            .or(env_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let file_cfg = read_config_file(&resolved)?;
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let camera = CameraSettings {
            device: file
                .camera
                .as_ref()
                .and_then(|c| c.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|c| c.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|c| c.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
            fps: file
                .camera
                .as_ref()
                .and_then(|c| c.fps)
                .unwrap_or(DEFAULT_CAMERA_FPS),
            buffer_size: file
                .camera
                .as_ref()
                .and_then(|c| c.buffer_size)
                .unwrap_or(DEFAULT_CAMERA_BUFFER_SIZE),
        };
        let detection = DetectionSettings {
            model_path: file
                .detection
                .as_ref()
                .and_then(|d| d.model_path.clone())
                .unwrap_or_default(),
            labels_path: file.detection.as_ref().and_then(|d| d.labels_path.clone()),
            input_size: file
                .detection
                .as_ref()
                .and_then(|d| d.input_size)
                .unwrap_or(DEFAULT_INPUT_SIZE),
            confidence_threshold: file
                .detection
                .as_ref()
                .and_then(|d| d.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            nms_iou_threshold: file
                .detection
                .as_ref()
                .and_then(|d| d.nms_iou_threshold)
                .unwrap_or(DEFAULT_NMS_IOU_THRESHOLD),
            jpeg_quality: file
                .detection
                .as_ref()
                .and_then(|d| d.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
        };
        Self {
            camera,
            detection,
            server_port: file
                .server
                .and_then(|s| s.port)
                .unwrap_or(DEFAULT_SERVER_PORT),
            log_dir: file
                .logging
                .as_ref()
                .and_then(|l| l.path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            metrics_interval_ms: file
                .logging
                .and_then(|l| l.metrics_interval_ms)
                .unwrap_or(DEFAULT_METRICS_INTERVAL_MS),
            use_acceleration: file
                .performance
                .and_then(|p| p.use_acceleration)
                .unwrap_or(false),
        }
    }

    /// All-defaults configuration for tests elsewhere in the crate.
    #[cfg(test)]
    pub(crate) fn test_defaults() -> Self {
        Self::from_file(AppConfigFile::default())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("SIGNWATCH_PORT") {
            if !port.trim().is_empty() {
                self.server_port = port
                    .parse()
                    .map_err(|_| anyhow!("SIGNWATCH_PORT must be a TCP port number"))?;
            }
        }
        if let Ok(device) = std::env::var("SIGNWATCH_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(dir) = std::env::var("SIGNWATCH_LOG_DIR") {
            if !dir.trim().is_empty() {
                self.log_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera.width and camera.height must be nonzero"));
        }
        if self.detection.input_size[0] == 0 || self.detection.input_size[1] == 0 {
            return Err(anyhow!("detection.input_size entries must be nonzero"));
        }
        for (name, value) in [
            (
                "detection.confidence_threshold",
                self.detection.confidence_threshold,
            ),
            (
                "detection.nms_iou_threshold",
                self.detection.nms_iou_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1]", name));
            }
        }
        if self.metrics_interval_ms == 0 {
            return Err(anyhow!("logging.metrics_interval_ms must be nonzero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        anyhow!(
            "failed to read config file {}: {}\n\
             Ensure the file exists and is readable, or pass --config /path/to/config.json",
            path.display(),
            e
        )
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
}
