//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::AgentConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    device_id: String,
    camera_enabled: bool,
    max_cameras: u32,
    fps: f64,
    dashboard_configured: bool,
    environment: String,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    device_id: config.device.id.clone(),
                    camera_enabled: config.camera.enabled,
                    max_cameras: config.camera.max_cameras,
                    fps: config.camera.fps,
                    dashboard_configured: config.dashboard.is_configured(),
                    environment: config.dashboard.environment.as_str().to_string(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &AgentConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let dashboard = &config.dashboard;

    if !dashboard.is_configured() {
        warnings.push("Dashboard not configured - detections are stored locally only".to_string());
    } else if dashboard.device_secret.as_deref().map_or(true, str::is_empty) {
        warnings.push("dashboard.device_secret is empty - requests will be unsigned".to_string());
    }

    if dashboard.api_url.as_deref().is_some_and(|u| u.starts_with("http://")) {
        warnings.push("dashboard.api_url uses plain HTTP".to_string());
    }

    if dashboard.ssl_verify == Some(false) {
        warnings.push("dashboard.ssl_verify is off - certificates are not checked".to_string());
    }

    if !config.camera.enabled {
        warnings.push("Camera disabled - no detections will be produced".to_string());
    } else if !config.camera.auto_recovery {
        warnings.push("camera.auto_recovery is off - failed cameras stay down".to_string());
    }

    if config.alerts.cooldown_seconds == 0.0 {
        warnings.push("alerts.cooldown_seconds is 0 - every detection is emitted".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Device: {}", summary.device_id);
            if summary.camera_enabled {
                println!("  Cameras: up to {} @ {} fps", summary.max_cameras, summary.fps);
            } else {
                println!("  Cameras: disabled");
            }
            println!(
                "  Dashboard: {} ({})",
                if summary.dashboard_configured { "configured" } else { "offline" },
                summary.environment
            );
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
