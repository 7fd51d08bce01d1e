//! Platform capability probing
//!
//! `PlatformCapabilities` is built once at startup and handed to the
//! supervisor through a `DeviceProbe`. Nothing here is global.

use std::fs;
use std::path::Path;

use contracts::CameraKind;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::CameraBackend;
use crate::simulated::SimulatedBackend;

/// V4L2 driver names of board-integrated (CSI) cameras
const INTEGRATED_DRIVERS: &[&str] = &["unicam", "bcm2835", "mmal", "rp1-cfe", "rkisp", "sun6i-csi"];

/// One `/dev/videoN` node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoDevice {
    pub index: u32,
    pub name: Option<String>,
    pub integrated: bool,
}

/// What the host offers, read once
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlatformCapabilities {
    pub os: String,
    pub arch: String,
    pub board_model: Option<String>,
    pub is_raspberry_pi: bool,
    pub video_devices: Vec<VideoDevice>,
    /// Current process belongs to the `video` group
    pub in_video_group: bool,
}

impl PlatformCapabilities {
    /// Probe the running host
    pub fn detect() -> Self {
        let board_model = fs::read_to_string("/proc/device-tree/model")
            .ok()
            .map(|m| m.trim_end_matches('\0').trim().to_string())
            .filter(|m| !m.is_empty());
        let is_raspberry_pi = board_model
            .as_deref()
            .is_some_and(|m| m.contains("Raspberry Pi"));

        let caps = Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            board_model,
            is_raspberry_pi,
            video_devices: scan_video_devices(
                Path::new("/dev"),
                Path::new("/sys/class/video4linux"),
            ),
            in_video_group: in_video_group(),
        };

        info!(
            os = %caps.os,
            arch = %caps.arch,
            board = ?caps.board_model,
            video_devices = caps.video_devices.len(),
            in_video_group = caps.in_video_group,
            "Platform capabilities detected"
        );
        if !caps.video_devices.is_empty() && !caps.in_video_group && caps.os == "linux" {
            warn!("Process is not in the 'video' group, camera access may be denied");
        }
        caps
    }

    /// Index of the first board-integrated camera node
    pub fn hardware_index(&self) -> Option<u32> {
        self.video_devices
            .iter()
            .find(|d| d.integrated)
            .map(|d| d.index)
    }

    /// External device indices, ascending
    pub fn external_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = self
            .video_devices
            .iter()
            .filter(|d| !d.integrated)
            .map(|d| d.index)
            .collect();
        indices.sort_unstable();
        indices
    }
}

fn scan_video_devices(dev_dir: &Path, sys_dir: &Path) -> Vec<VideoDevice> {
    let Ok(entries) = fs::read_dir(dev_dir) else {
        return Vec::new();
    };

    let mut devices: Vec<VideoDevice> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let file_name = e.file_name();
            let index = file_name.to_str()?.strip_prefix("video")?.parse::<u32>().ok()?;
            let name = fs::read_to_string(sys_dir.join(format!("video{index}")).join("name"))
                .ok()
                .map(|n| n.trim().to_string());
            let integrated = name
                .as_deref()
                .is_some_and(|n| INTEGRATED_DRIVERS.iter().any(|d| n.contains(d)));
            Some(VideoDevice {
                index,
                name,
                integrated,
            })
        })
        .collect();
    devices.sort_by_key(|d| d.index);
    devices
}

fn in_video_group() -> bool {
    let Some(video_gid) = fs::read_to_string("/etc/group").ok().and_then(|groups| {
        groups
            .lines()
            .find(|l| l.starts_with("video:"))
            .and_then(|l| l.split(':').nth(2))
            .and_then(|gid| gid.parse::<u32>().ok())
    }) else {
        return false;
    };

    fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|l| l.starts_with("Groups:"))
                .map(|l| {
                    l.split_whitespace()
                        .skip(1)
                        .filter_map(|g| g.parse::<u32>().ok())
                        .any(|g| g == video_gid)
                })
        })
        .unwrap_or(false)
}

/// Opens capture backends for discovery and recovery
pub trait DeviceProbe: Send + Sync {
    /// Capabilities the probe was built from
    fn capabilities(&self) -> &PlatformCapabilities;

    /// Board-integrated camera, if present
    fn open_hardware(&self) -> Option<Box<dyn CameraBackend>>;

    /// Enumerated external device indices, ascending
    fn external_indices(&self) -> Vec<u32>;

    /// External device by index
    fn open_external(&self, index: u32) -> Option<Box<dyn CameraBackend>>;

    /// Synthetic generator
    fn open_simulated(&self, index: u32) -> Box<dyn CameraBackend> {
        Box::new(SimulatedBackend::new(index))
    }

    /// Re-open a specific source
    fn open(&self, kind: CameraKind, index: u32) -> Option<Box<dyn CameraBackend>> {
        match kind {
            CameraKind::Hardware => self.open_hardware(),
            CameraKind::Fallback => self.open_external(index),
            CameraKind::Simulated => Some(self.open_simulated(index)),
        }
    }
}

/// Probe backed by the host's V4L2 nodes
pub struct SystemProbe {
    caps: PlatformCapabilities,
}

impl SystemProbe {
    pub fn new(caps: PlatformCapabilities) -> Self {
        Self { caps }
    }
}

impl DeviceProbe for SystemProbe {
    fn capabilities(&self) -> &PlatformCapabilities {
        &self.caps
    }

    fn open_hardware(&self) -> Option<Box<dyn CameraBackend>> {
        let index = self.caps.hardware_index()?;
        open_v4l2(CameraKind::Hardware, index)
    }

    fn external_indices(&self) -> Vec<u32> {
        self.caps.external_indices()
    }

    fn open_external(&self, index: u32) -> Option<Box<dyn CameraBackend>> {
        open_v4l2(CameraKind::Fallback, index)
    }
}

#[cfg(feature = "v4l2")]
fn open_v4l2(kind: CameraKind, index: u32) -> Option<Box<dyn CameraBackend>> {
    Some(Box::new(crate::v4l2::V4l2Backend::new(kind, index)))
}

#[cfg(not(feature = "v4l2"))]
fn open_v4l2(kind: CameraKind, index: u32) -> Option<Box<dyn CameraBackend>> {
    debug!(%kind, index, "V4L2 support not compiled in, skipping device");
    None
}
