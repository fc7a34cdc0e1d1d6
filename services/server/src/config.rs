//! Configuration for the server.

use std::time::Duration;

use anyhow::Result;

use crate::factory::FactoryConfig;
use crate::operation::OperationConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub operations: OperationConfig,

    pub factory: FactoryConfig,

    /// Mailbox size of the embedded agent and of the event channel.
    pub mailbox_size: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            operations: OperationConfig::default(),
            factory: FactoryConfig::default(),
            mailbox_size: 256,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let operations = OperationConfig {
            default_timeout: Duration::from_secs(env_u64(
                "FLEET_OPERATION_TIMEOUT",
                defaults.operations.default_timeout.as_secs(),
            )),
            sweep_interval: Duration::from_secs(env_u64(
                "FLEET_OPERATION_SWEEP_INTERVAL",
                defaults.operations.sweep_interval.as_secs(),
            )),
        };

        let factory = FactoryConfig {
            timeout: Duration::from_secs(env_u64("FLEET_FACTORY_TIMEOUT", defaults.factory.timeout.as_secs())),
            sweep_interval: Duration::from_secs(env_u64(
                "FLEET_FACTORY_SWEEP_INTERVAL",
                defaults.factory.sweep_interval.as_secs(),
            )),
            history_limit: env_u64("FLEET_FACTORY_HISTORY_LIMIT", defaults.factory.history_limit as u64) as usize,
        };

        let log_level = std::env::var("FLEET_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            operations,
            factory,
            mailbox_size: defaults.mailbox_size,
            log_level,
        })
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
