//! Dashboard synchronization data types

use serde::{Deserialize, Serialize};

use crate::CameraSnapshot;

/// Outbound detection payload awaiting delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub detection_id: i64,
    pub device_id: String,
    pub timestamp: f64,
    pub class_name: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

/// Dashboard connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    /// No endpoint or credentials configured
    Offline,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }
}

/// Last error seen by the sync client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    /// HTTP status, when the server answered
    pub code: Option<u16>,
    pub timestamp: f64,
}

/// Connection bookkeeping, one per sync client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub last_error: Option<ErrorInfo>,
    pub last_heartbeat_at: Option<f64>,
    pub last_health_check_at: Option<f64>,
    pub last_sync_at: Option<f64>,
}

/// Host resource usage reported with heartbeats
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemTelemetry {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub temperature_celsius: Option<f32>,
    pub disk_percent: f32,
    pub disk_used_gb: f64,
    pub disk_total_gb: f64,
}

/// Static device description sent on registration and heartbeat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub name: String,
    pub platform: String,
    pub arch: String,
    pub agent_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_model: Option<String>,
}

/// Everything a heartbeat reports beyond identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatStats {
    pub uptime_seconds: u64,
    pub detection_count: u64,
    pub system: Option<SystemTelemetry>,
    pub cameras: Vec<CameraSnapshot>,
    pub latency_ms: Option<f64>,
}
