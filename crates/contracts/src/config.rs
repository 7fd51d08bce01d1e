//! AgentConfig - Config Loader output
//!
//! Every section and field has a default so a minimal file only needs `[device]`.

use serde::{Deserialize, Serialize};

/// Complete agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub dashboard: DashboardConfig,

    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub observability: ObservabilitySettings,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub id: String,

    #[serde(default = "default_device_name")]
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            name: default_device_name(),
        }
    }
}

fn default_device_id() -> String {
    "edge-device-001".to_string()
}

fn default_device_name() -> String {
    "Edge Detection Device".to_string()
}

/// Camera discovery, capture and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Pixel format of emitted frames: RGB888, BGR888 or GRAY8
    pub format: String,
    /// Degrees, one of 0/90/180/270
    pub rotation: u32,
    /// Try enumerated external (USB) devices
    pub fallback_usb: bool,
    /// Fall back to the synthetic generator when nothing else works
    pub simulated_fallback: bool,
    /// Preferred external device index
    pub device_index: Option<u32>,
    pub max_cameras: u32,
    pub auto_recovery: bool,
    /// Consecutive capture failures before recovery starts
    pub error_threshold: u32,
    pub max_recovery_attempts: u32,
    pub recovery_base_delay_ms: u64,
    pub recovery_max_delay_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 640,
            height: 480,
            fps: 10.0,
            format: "RGB888".to_string(),
            rotation: 0,
            fallback_usb: true,
            simulated_fallback: true,
            device_index: None,
            max_cameras: 1,
            auto_recovery: true,
            error_threshold: 10,
            max_recovery_attempts: 5,
            recovery_base_delay_ms: 1_000,
            recovery_max_delay_ms: 60_000,
        }
    }
}

/// Detection post-filtering and queueing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    /// Non-maximum suppression overlap, handed to the detector
    pub iou_threshold: f32,
    /// Empty = every class
    pub target_classes: Vec<String>,
    /// Inference worker threads, handed to the detector
    pub num_threads: usize,
    /// Capture -> processing work queue
    pub queue_capacity: usize,
    /// Processing -> sink event queue
    pub event_queue_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            target_classes: Vec::new(),
            num_threads: 4,
            queue_capacity: 10,
            event_queue_capacity: 100,
        }
    }
}

/// Alert deduplication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub cooldown_seconds: f64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 30.0,
        }
    }
}

/// Local persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
    pub images_path: String,
    pub save_images: bool,
    /// 1-100
    pub jpeg_quality: u8,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "data/detections.db".to_string(),
            images_path: "data/images".to_string(),
            save_images: true,
            jpeg_quality: 85,
        }
    }
}

/// Deployment profile selecting connection defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Remote dashboard synchronization
///
/// `None` overrides fall back to the environment profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub device_secret: Option<String>,
    pub environment: Environment,
    pub sync_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub offline_queue_capacity: usize,
    pub batch_size: usize,
    pub embed_images: bool,
    pub max_image_kb: usize,

    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub retry_backoff: Option<f64>,
    pub max_retry_delay_ms: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub health_check_interval_secs: Option<u64>,
    pub ssl_verify: Option<bool>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            device_secret: None,
            environment: Environment::default(),
            sync_interval_secs: 60,
            heartbeat_interval_secs: 60,
            offline_queue_capacity: 1000,
            batch_size: 10,
            embed_images: false,
            max_image_kb: 100,
            max_retries: None,
            retry_delay_ms: None,
            retry_backoff: None,
            max_retry_delay_ms: None,
            connect_timeout_secs: None,
            read_timeout_secs: None,
            health_check_interval_secs: None,
            ssl_verify: None,
        }
    }
}

impl DashboardConfig {
    /// Both an endpoint and an API key are present
    pub fn is_configured(&self) -> bool {
        self.api_url.as_deref().is_some_and(|u| !u.is_empty())
            && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Process lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub shutdown_timeout_secs: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 10,
        }
    }
}

/// Logging and metrics export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    pub log_level: String,
    /// Prometheus listener port, None = disabled
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}
