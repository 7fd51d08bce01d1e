//! Configuration validation
//!
//! Rules:
//! - camera geometry and rate are positive, rotation is a right angle
//! - camera format names a supported pixel layout
//! - recovery thresholds are at least one
//! - thresholds are probabilities, cooldown is non-negative
//! - queue capacities and batch size are positive
//! - dashboard url uses http(s), retry backoff does not shrink

use contracts::{AgentConfig, ContractError, PixelFormat};

/// Validate an AgentConfig
///
/// Returns the first error encountered.
pub fn validate(config: &AgentConfig) -> Result<(), ContractError> {
    validate_device(config)?;
    validate_camera(config)?;
    validate_detection(config)?;
    validate_storage(config)?;
    validate_dashboard(config)?;
    Ok(())
}

fn validate_device(config: &AgentConfig) -> Result<(), ContractError> {
    if config.device.id.trim().is_empty() {
        return Err(ContractError::config_validation(
            "device.id",
            "device id cannot be empty",
        ));
    }
    Ok(())
}

fn validate_camera(config: &AgentConfig) -> Result<(), ContractError> {
    let camera = &config.camera;

    if !(camera.fps > 0.0 && camera.fps.is_finite()) {
        return Err(ContractError::config_validation(
            "camera.fps",
            format!("fps must be > 0, got {}", camera.fps),
        ));
    }
    if camera.width == 0 || camera.height == 0 {
        return Err(ContractError::config_validation(
            "camera.width / camera.height",
            format!(
                "dimensions must be > 0, got {}x{}",
                camera.width, camera.height
            ),
        ));
    }
    if !matches!(camera.rotation, 0 | 90 | 180 | 270) {
        return Err(ContractError::config_validation(
            "camera.rotation",
            format!("rotation must be 0, 90, 180 or 270, got {}", camera.rotation),
        ));
    }
    if PixelFormat::from_name(&camera.format).is_none() {
        return Err(ContractError::config_validation(
            "camera.format",
            format!(
                "unsupported format {:?}, expected RGB888, BGR888 or GRAY8",
                camera.format
            ),
        ));
    }
    for (field, value) in [
        ("camera.max_cameras", camera.max_cameras),
        ("camera.error_threshold", camera.error_threshold),
        ("camera.max_recovery_attempts", camera.max_recovery_attempts),
    ] {
        if value == 0 {
            return Err(ContractError::config_validation(field, "must be >= 1"));
        }
    }
    if camera.recovery_base_delay_ms > camera.recovery_max_delay_ms {
        return Err(ContractError::config_validation(
            "camera.recovery_base_delay_ms / camera.recovery_max_delay_ms",
            format!(
                "base delay ({}) must be <= max delay ({})",
                camera.recovery_base_delay_ms, camera.recovery_max_delay_ms
            ),
        ));
    }
    Ok(())
}

fn validate_detection(config: &AgentConfig) -> Result<(), ContractError> {
    let detection = &config.detection;

    for (field, value) in [
        ("detection.confidence_threshold", detection.confidence_threshold),
        ("detection.iou_threshold", detection.iou_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ContractError::config_validation(
                field,
                format!("must be within [0, 1], got {value}"),
            ));
        }
    }
    if detection.num_threads == 0 {
        return Err(ContractError::config_validation(
            "detection.num_threads",
            "must be >= 1",
        ));
    }
    if detection.queue_capacity == 0 || detection.event_queue_capacity == 0 {
        return Err(ContractError::config_validation(
            "detection.queue_capacity / detection.event_queue_capacity",
            "queue capacities must be > 0",
        ));
    }
    if !(config.alerts.cooldown_seconds >= 0.0 && config.alerts.cooldown_seconds.is_finite()) {
        return Err(ContractError::config_validation(
            "alerts.cooldown_seconds",
            format!(
                "cooldown must be >= 0, got {}",
                config.alerts.cooldown_seconds
            ),
        ));
    }
    Ok(())
}

fn validate_storage(config: &AgentConfig) -> Result<(), ContractError> {
    let quality = config.storage.jpeg_quality;
    if !(1..=100).contains(&quality) {
        return Err(ContractError::config_validation(
            "storage.jpeg_quality",
            format!("quality must be within 1..=100, got {quality}"),
        ));
    }
    if config.storage.database_path.is_empty() {
        return Err(ContractError::config_validation(
            "storage.database_path",
            "database path cannot be empty",
        ));
    }
    Ok(())
}

fn validate_dashboard(config: &AgentConfig) -> Result<(), ContractError> {
    let dashboard = &config.dashboard;

    if let Some(url) = dashboard.api_url.as_deref().filter(|u| !u.is_empty()) {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ContractError::config_validation(
                "dashboard.api_url",
                format!("url must start with http:// or https://, got '{url}'"),
            ));
        }
    }
    if dashboard.batch_size == 0 || dashboard.offline_queue_capacity == 0 {
        return Err(ContractError::config_validation(
            "dashboard.batch_size / dashboard.offline_queue_capacity",
            "must be > 0",
        ));
    }
    if let Some(backoff) = dashboard.retry_backoff {
        if backoff < 1.0 {
            return Err(ContractError::config_validation(
                "dashboard.retry_backoff",
                format!("backoff factor must be >= 1, got {backoff}"),
            ));
        }
    }
    if dashboard.max_retries == Some(0) {
        return Err(ContractError::config_validation(
            "dashboard.max_retries",
            "at least one attempt is required",
        ));
    }
    if dashboard.sync_interval_secs == 0 || dashboard.heartbeat_interval_secs == 0 {
        return Err(ContractError::config_validation(
            "dashboard.sync_interval_secs / dashboard.heartbeat_interval_secs",
            "intervals must be > 0",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: Result<(), ContractError>) -> String {
        match result {
            Err(ContractError::ConfigValidation { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&AgentConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_fps_rejected() {
        let mut config = AgentConfig::default();
        config.camera.fps = 0.0;
        assert_eq!(field_of(validate(&config)), "camera.fps");
    }

    #[test]
    fn test_odd_rotation_rejected() {
        let mut config = AgentConfig::default();
        config.camera.rotation = 45;
        assert_eq!(field_of(validate(&config)), "camera.rotation");
    }

    #[test]
    fn test_unknown_format_rejected() {
        let mut config = AgentConfig::default();
        config.camera.format = "YUYV".to_string();
        assert_eq!(field_of(validate(&config)), "camera.format");

        config.camera.format = "gray8".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_detector_threads_rejected() {
        let mut config = AgentConfig::default();
        config.detection.num_threads = 0;
        assert_eq!(field_of(validate(&config)), "detection.num_threads");
    }

    #[test]
    fn test_zero_error_threshold_rejected() {
        let mut config = AgentConfig::default();
        config.camera.error_threshold = 0;
        assert_eq!(field_of(validate(&config)), "camera.error_threshold");
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let mut config = AgentConfig::default();
        config.detection.confidence_threshold = 1.5;
        assert_eq!(
            field_of(validate(&config)),
            "detection.confidence_threshold"
        );
    }

    #[test]
    fn test_non_http_url_rejected() {
        let mut config = AgentConfig::default();
        config.dashboard.api_url = Some("ftp://dashboard".to_string());
        assert_eq!(field_of(validate(&config)), "dashboard.api_url");
    }

    #[test]
    fn test_shrinking_backoff_rejected() {
        let mut config = AgentConfig::default();
        config.dashboard.retry_backoff = Some(0.5);
        assert_eq!(field_of(validate(&config)), "dashboard.retry_backoff");
    }

    #[test]
    fn test_negative_cooldown_rejected() {
        let mut config = AgentConfig::default();
        config.alerts.cooldown_seconds = -1.0;
        assert_eq!(field_of(validate(&config)), "alerts.cooldown_seconds");
    }
}
