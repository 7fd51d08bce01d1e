//! `info` command implementation.

use anyhow::{Context, Result};
use camera::PlatformCapabilities;
use contracts::AgentConfig;
use serde::Serialize;
use sync_client::ConnectionProfile;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    device: DeviceInfo,
    camera: CameraInfo,
    detection: DetectionInfo,
    storage: StorageInfo,
    dashboard: DashboardInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<PlatformCapabilities>,
}

#[derive(Serialize)]
struct DeviceInfo {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct CameraInfo {
    enabled: bool,
    resolution: String,
    fps: f64,
    max_cameras: u32,
    auto_recovery: bool,
}

#[derive(Serialize)]
struct DetectionInfo {
    confidence_threshold: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    target_classes: Vec<String>,
    cooldown_seconds: f64,
}

#[derive(Serialize)]
struct StorageInfo {
    database_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images_path: Option<String>,
}

#[derive(Serialize)]
struct DashboardInfo {
    configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_url: Option<String>,
    environment: String,
    signed: bool,
    max_retries: u32,
    health_check_interval_secs: u64,
    ssl_verify: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let platform = args.platform.then(PlatformCapabilities::detect);
    let info = build_config_info(&config, platform);

    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn build_config_info(config: &AgentConfig, platform: Option<PlatformCapabilities>) -> ConfigInfo {
    let profile = ConnectionProfile::for_environment(config.dashboard.environment)
        .with_overrides(&config.dashboard);

    ConfigInfo {
        device: DeviceInfo {
            id: config.device.id.clone(),
            name: config.device.name.clone(),
        },
        camera: CameraInfo {
            enabled: config.camera.enabled,
            resolution: format!("{}x{}", config.camera.width, config.camera.height),
            fps: config.camera.fps,
            max_cameras: config.camera.max_cameras,
            auto_recovery: config.camera.auto_recovery,
        },
        detection: DetectionInfo {
            confidence_threshold: config.detection.confidence_threshold,
            target_classes: config.detection.target_classes.clone(),
            cooldown_seconds: config.alerts.cooldown_seconds,
        },
        storage: StorageInfo {
            database_path: config.storage.database_path.clone(),
            images_path: config
                .storage
                .save_images
                .then(|| config.storage.images_path.clone()),
        },
        dashboard: DashboardInfo {
            configured: config.dashboard.is_configured(),
            api_url: config.dashboard.api_url.clone(),
            environment: config.dashboard.environment.as_str().to_string(),
            signed: config
                .dashboard
                .device_secret
                .as_deref()
                .is_some_and(|s| !s.is_empty()),
            max_retries: profile.max_retries,
            health_check_interval_secs: profile.health_check_interval.as_secs(),
            ssl_verify: profile.ssl_verify,
        },
        platform,
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 Edge Agent Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("🏷️  Device");
    println!("   ├─ Id: {}", info.device.id);
    println!("   └─ Name: {}", info.device.name);

    let camera = &info.camera;
    println!("\n📷 Camera");
    if camera.enabled {
        println!("   ├─ Resolution: {} @ {} fps", camera.resolution, camera.fps);
        println!("   ├─ Max cameras: {}", camera.max_cameras);
        println!(
            "   └─ Auto recovery: {}",
            if camera.auto_recovery { "on" } else { "off" }
        );
    } else {
        println!("   └─ Disabled");
    }

    let detection = &info.detection;
    println!("\n🔍 Detection");
    println!("   ├─ Confidence: >= {}", detection.confidence_threshold);
    if detection.target_classes.is_empty() {
        println!("   ├─ Classes: all");
    } else {
        println!("   ├─ Classes: {}", detection.target_classes.join(", "));
    }
    println!("   └─ Cooldown: {}s", detection.cooldown_seconds);

    println!("\n💾 Storage");
    match &info.storage.images_path {
        Some(images) => {
            println!("   ├─ Database: {}", info.storage.database_path);
            println!("   └─ Images: {}", images);
        }
        None => println!("   └─ Database: {}", info.storage.database_path),
    }

    let dashboard = &info.dashboard;
    println!("\n🌐 Dashboard");
    match (&dashboard.api_url, dashboard.configured) {
        (Some(url), true) => {
            println!("   ├─ URL: {} ({})", url, dashboard.environment);
            println!("   ├─ Signed: {}", if dashboard.signed { "yes" } else { "no" });
            println!(
                "   ├─ Retries: {}, health every {}s",
                dashboard.max_retries, dashboard.health_check_interval_secs
            );
            println!("   └─ TLS verify: {}", dashboard.ssl_verify);
        }
        _ => println!("   └─ Offline"),
    }

    if let Some(platform) = &info.platform {
        println!("\n🖥️  Platform");
        println!("   ├─ OS: {} ({})", platform.os, platform.arch);
        if let Some(model) = &platform.board_model {
            println!("   ├─ Board: {}", model);
        }
        println!("   ├─ Video group: {}", platform.in_video_group);
        println!("   └─ Video devices ({})", platform.video_devices.len());
        for (i, device) in platform.video_devices.iter().enumerate() {
            let prefix = if i == platform.video_devices.len() - 1 { "└─" } else { "├─" };
            println!(
                "      {} /dev/video{} {}{}",
                prefix,
                device.index,
                device.name.as_deref().unwrap_or("unknown"),
                if device.integrated { " (integrated)" } else { "" }
            );
        }
    }

    println!();
}
