//! Host resource sampling via `sysinfo`

use std::path::Path;
use std::sync::Mutex;

use contracts::{SystemTelemetry, TelemetryProvider};
use sysinfo::{Components, Disks, System};

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: f64 = (BYTES_PER_MB * 1024) as f64;

/// Samples CPU, memory, root disk and CPU temperature.
///
/// CPU usage is a delta between refreshes, so the first sample after
/// construction reads close to zero.
pub struct SystemMonitor {
    system: Mutex<System>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryProvider for SystemMonitor {
    fn sample(&self) -> Option<SystemTelemetry> {
        let Ok(mut system) = self.system.lock() else {
            tracing::warn!("System monitor lock poisoned, skipping telemetry sample");
            return None;
        };
        system.refresh_cpu();
        system.refresh_memory();

        let cpus = system.cpus();
        let cpu_percent = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        let memory_total = system.total_memory();
        let memory_used = system.used_memory();
        drop(system);

        let disks = Disks::new_with_refreshed_list();
        let (disk_used, disk_total) = disks
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .map(|d| {
                let total = d.total_space();
                (total.saturating_sub(d.available_space()), total)
            })
            .unwrap_or((0, 0));

        let components = Components::new_with_refreshed_list();
        let temperature_celsius = components
            .iter()
            .find(|c| {
                let label = c.label();
                label.contains("CPU") || label.contains("Core") || label.contains("cpu_thermal")
            })
            .map(|c| c.temperature())
            .filter(|t| t.is_finite() && *t > 0.0);

        Some(SystemTelemetry {
            cpu_percent,
            memory_percent: percent(memory_used, memory_total),
            memory_used_mb: memory_used / BYTES_PER_MB,
            memory_total_mb: memory_total / BYTES_PER_MB,
            temperature_celsius,
            disk_percent: percent(disk_used, disk_total),
            disk_used_gb: disk_used as f64 / BYTES_PER_GB,
            disk_total_gb: disk_total as f64 / BYTES_PER_GB,
        })
    }
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 100.0) as f32
    }
}
