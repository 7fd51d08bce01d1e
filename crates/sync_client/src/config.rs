//! Connection profiles and client configuration

use std::time::Duration;

use contracts::{AgentConfig, BackoffPolicy, DashboardConfig, Environment};

/// Sync drain period never exceeds this, however long `sync_interval` is
pub const MAX_SYNC_PERIOD: Duration = Duration::from_secs(30);

/// Timeouts, retry policy and probe cadence for one environment
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionProfile {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Total attempts per request, first one included
    pub max_retries: u32,
    pub retry: BackoffPolicy,
    pub health_check_interval: Duration,
    pub reconnect_interval: Duration,
    pub ssl_verify: bool,
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry: BackoffPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(60)),
            health_check_interval: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(5),
            ssl_verify: true,
        }
    }
}

impl ConnectionProfile {
    /// Short timeouts, few retries, self-signed certificates accepted
    pub fn development() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(15),
            max_retries: 2,
            retry: BackoffPolicy::new(Duration::from_millis(500), 2.0, Duration::from_secs(60)),
            health_check_interval: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(2),
            ssl_verify: false,
        }
    }

    pub fn production() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_retries: 5,
            retry: BackoffPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(120)),
            health_check_interval: Duration::from_secs(60),
            reconnect_interval: Duration::from_secs(10),
            ssl_verify: true,
        }
    }

    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Development => Self::development(),
            Environment::Production => Self::production(),
        }
    }

    /// Apply the explicit `[dashboard]` overrides on top of the profile
    pub fn with_overrides(mut self, dashboard: &DashboardConfig) -> Self {
        if let Some(max_retries) = dashboard.max_retries {
            self.max_retries = max_retries.max(1);
        }
        if let Some(ms) = dashboard.retry_delay_ms {
            self.retry.base = Duration::from_millis(ms);
        }
        if let Some(factor) = dashboard.retry_backoff {
            self.retry.factor = factor;
        }
        if let Some(ms) = dashboard.max_retry_delay_ms {
            self.retry.max = Duration::from_millis(ms);
        }
        if let Some(secs) = dashboard.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = dashboard.read_timeout_secs {
            self.read_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = dashboard.health_check_interval_secs {
            self.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(verify) = dashboard.ssl_verify {
            self.ssl_verify = verify;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    /// Without trailing slash
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub device_id: String,
    /// Empty = unsigned requests
    pub device_secret: Option<String>,
    pub environment: Environment,
    pub sync_interval: Duration,
    pub heartbeat_interval: Duration,
    pub offline_queue_capacity: usize,
    pub batch_size: usize,
    pub profile: ConnectionProfile,
}

impl Default for SyncClientConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for SyncClientConfig {
    fn from(config: &AgentConfig) -> Self {
        let dashboard = &config.dashboard;
        Self {
            api_url: dashboard
                .api_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            api_key: dashboard.api_key.clone().filter(|k| !k.is_empty()),
            device_id: config.device.id.clone(),
            device_secret: dashboard.device_secret.clone().filter(|s| !s.is_empty()),
            environment: dashboard.environment,
            sync_interval: Duration::from_secs(dashboard.sync_interval_secs),
            heartbeat_interval: Duration::from_secs(dashboard.heartbeat_interval_secs),
            offline_queue_capacity: dashboard.offline_queue_capacity,
            batch_size: dashboard.batch_size.max(1),
            profile: ConnectionProfile::for_environment(dashboard.environment)
                .with_overrides(dashboard),
        }
    }
}

impl SyncClientConfig {
    pub fn is_configured(&self) -> bool {
        self.api_url.is_some() && self.api_key.is_some()
    }

    pub fn sync_period(&self) -> Duration {
        self.sync_interval.min(MAX_SYNC_PERIOD)
    }
}
