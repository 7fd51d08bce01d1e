//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::AgentConfig;
use runtime::{shutdown_signal, RuntimeComponents, ServiceRuntime};
use std::time::Duration;
use tracing::info;

use crate::cli::RunArgs;

/// Execute the `run` command
pub async fn run_agent(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let mut config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    apply_overrides(&mut config, args);
    config_loader::ConfigLoader::validate(&config)
        .context("Configuration invalid after command-line overrides")?;

    info!(
        device_id = %config.device.id,
        camera = config.camera.enabled,
        max_cameras = config.camera.max_cameras,
        dashboard = config.dashboard.is_configured(),
        environment = config.dashboard.environment.as_str(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    let metrics_port = match args.metrics_port {
        Some(0) => None,
        Some(port) => Some(port),
        None => config.observability.metrics_port,
    };
    if let Some(port) = metrics_port {
        observability::init_metrics_only(port)?;
        info!("Metrics endpoint available on port {}", port);
    }

    let components = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || RuntimeComponents::from_config(&config))
            .await
            .context("Component setup task failed")?
            .context("Failed to set up runtime components")?
    };
    let runtime = ServiceRuntime::new(config, components);

    let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let shutdown = async move {
        match duration {
            Some(duration) => {
                tokio::select! {
                    _ = shutdown_signal() => {}
                    _ = tokio::time::sleep(duration) => {
                        info!(secs = duration.as_secs(), "Run duration elapsed");
                    }
                }
            }
            None => shutdown_signal().await,
        }
    };

    info!("Starting agent...");
    runtime
        .run_until(shutdown)
        .await
        .context("Agent failed to start")?;

    let stats = runtime.stats();
    info!(
        uptime_secs = stats.uptime.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        persisted = stats.sink.records_persisted,
        synced = stats.sync.detections_synced,
        "Agent stopped"
    );
    stats.print_summary();

    Ok(())
}

fn apply_overrides(config: &mut AgentConfig, args: &RunArgs) {
    if let Some(ref device_id) = args.device_id {
        info!(device_id = %device_id, "Overriding device id from CLI");
        config.device.id = device_id.clone();
    }
    if let Some(ref api_url) = args.api_url {
        info!(api_url = %api_url, "Overriding dashboard URL from CLI");
        config.dashboard.api_url = Some(api_url.clone());
    }
    if let Some(ref api_key) = args.api_key {
        config.dashboard.api_key = Some(api_key.clone());
    }
    if let Some(ref secret) = args.device_secret {
        config.dashboard.device_secret = Some(secret.clone());
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &AgentConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Device:");
    println!("  Id: {}", config.device.id);
    println!("  Name: {}", config.device.name);

    println!("\nCamera:");
    if config.camera.enabled {
        println!(
            "  {}x{} @ {} fps, up to {} camera(s)",
            config.camera.width, config.camera.height, config.camera.fps, config.camera.max_cameras
        );
        println!(
            "  Recovery: {} (threshold {}, {} attempts)",
            if config.camera.auto_recovery { "on" } else { "off" },
            config.camera.error_threshold,
            config.camera.max_recovery_attempts
        );
    } else {
        println!("  Disabled");
    }

    println!("\nDetection:");
    println!("  Confidence >= {}", config.detection.confidence_threshold);
    if !config.detection.target_classes.is_empty() {
        println!("  Classes: {:?}", config.detection.target_classes);
    }
    println!("  Cooldown: {}s", config.alerts.cooldown_seconds);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    if config.storage.save_images {
        println!("  Images: {}", config.storage.images_path);
    }

    println!("\nDashboard:");
    match (&config.dashboard.api_url, config.dashboard.is_configured()) {
        (Some(url), true) => {
            println!("  URL: {url}");
            println!("  Environment: {}", config.dashboard.environment.as_str());
            println!(
                "  Signing: {}",
                if config.dashboard.device_secret.is_some() { "on" } else { "off" }
            );
        }
        _ => println!("  Not configured (offline mode)"),
    }

    println!();
}
