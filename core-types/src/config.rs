use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Config structure with the knobs the reconciliation engine depends on.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub entitlement: EntitlementConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: u64,
    #[serde(default = "default_soon_expiration_days")]
    pub soon_expiration_days: i64,
    #[serde(default = "default_transaction_timeout_minutes")]
    pub transaction_timeout_minutes: i64,
    #[serde(default = "default_outbound_timeout_s")]
    pub outbound_timeout_s: u64,
    #[serde(default = "default_outbound_concurrency")]
    pub outbound_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: default_poll_interval_s(),
            soon_expiration_days: default_soon_expiration_days(),
            transaction_timeout_minutes: default_transaction_timeout_minutes(),
            outbound_timeout_s: default_outbound_timeout_s(),
            outbound_concurrency: default_outbound_concurrency(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_s)
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_timeout_s)
    }
}

fn default_poll_interval_s() -> u64 {
    10
}

fn default_soon_expiration_days() -> i64 {
    7
}

fn default_transaction_timeout_minutes() -> i64 {
    10
}

fn default_outbound_timeout_s() -> u64 {
    15
}

fn default_outbound_concurrency() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    pub dsn: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DedupConfig {
    pub redis_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub account_id: String,
    pub secret_key: String,
    /// Where the gateway redirects the user after interactive confirmation.
    #[serde(default)]
    pub return_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EntitlementConfig {
    pub base_url: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    pub base_url: String,
    pub secret_key: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("BILLING").separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        if config.database.dsn.is_empty() {
            return Err(ConfigError::Message(
                "BILLING__DATABASE__DSN is required".to_string(),
            ));
        }
        if config.dedup.redis_url.is_empty() {
            return Err(ConfigError::Message(
                "BILLING__DEDUP__REDIS_URL is required".to_string(),
            ));
        }
        if config.gateway.base_url.is_empty() {
            return Err(ConfigError::Message(
                "BILLING__GATEWAY__BASE_URL is required".to_string(),
            ));
        }
        if config.entitlement.base_url.is_empty() {
            return Err(ConfigError::Message(
                "BILLING__ENTITLEMENT__BASE_URL is required".to_string(),
            ));
        }
        if config.notification.base_url.is_empty() {
            return Err(ConfigError::Message(
                "BILLING__NOTIFICATION__BASE_URL is required".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_defaults_match_documented_knobs() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(10));
        assert_eq!(cfg.soon_expiration_days, 7);
        assert_eq!(cfg.transaction_timeout_minutes, 10);
    }
}
