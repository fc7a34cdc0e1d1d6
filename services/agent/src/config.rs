//! Configuration for the agent.

use std::time::Duration;

use anyhow::Result;
use fleet_id::AgentId;

use crate::discovery::DiscoveryConfig;
use crate::inventory::InventoryConfig;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this agent.
    pub agent_id: AgentId,

    /// Display name, also the key of the local host platform.
    pub agent_name: String,

    pub discovery: DiscoveryConfig,

    pub inventory: InventoryConfig,

    /// Default limit on operations and factory requests, in seconds.
    pub operation_timeout_secs: u64,

    /// Mailbox size of the command actor.
    pub mailbox_size: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_id: AgentId::new(),
            agent_name: "localhost".to_string(),
            discovery: DiscoveryConfig::default(),
            inventory: InventoryConfig::default(),
            operation_timeout_secs: 3600,
            mailbox_size: 256,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let agent_id = std::env::var("FLEET_AGENT_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.agent_id);

        let agent_name = std::env::var("FLEET_AGENT_NAME")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.agent_name);

        let discovery = DiscoveryConfig {
            interval: Duration::from_secs(env_u64("FLEET_DISCOVERY_INTERVAL", 60)),
            availability_interval: Duration::from_secs(env_u64("FLEET_AVAILABILITY_INTERVAL", 30)),
            timeout: Duration::from_millis(env_u64("FLEET_DISCOVERY_TIMEOUT_MS", 300_000)),
            workers: env_u64("FLEET_DISCOVERY_WORKERS", 4) as usize,
        };

        let inventory = InventoryConfig {
            start_timeout: Duration::from_millis(env_u64("FLEET_COMPONENT_START_TIMEOUT_MS", 60_000)),
            auto_commit: std::env::var("FLEET_AUTO_COMMIT")
                .map(|s| matches!(s.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            ..defaults.inventory
        };

        let log_level = std::env::var("FLEET_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            agent_id,
            agent_name,
            discovery,
            inventory,
            operation_timeout_secs: env_u64("FLEET_OPERATION_TIMEOUT", defaults.operation_timeout_secs),
            mailbox_size: defaults.mailbox_size,
            log_level,
        })
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
