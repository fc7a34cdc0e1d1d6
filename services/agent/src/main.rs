//! Fleet agent
//!
//! Runs discovery against the built-in demo plugin and logs server-bound
//! events. Without a server attached, commands can only come from tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet_agent::actors::Supervisor;
use fleet_agent::mock::register_demo;
use fleet_agent::{Agent, Config, MockPlugin, PluginRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        agent_id = %config.agent_id,
        agent_name = %config.agent_name,
        auto_commit = config.inventory.auto_commit,
        "Starting fleet agent"
    );

    let registry = Arc::new(PluginRegistry::new());
    register_demo(&registry, &MockPlugin::new(), &config.agent_name)?;

    let agent = Agent::new(config, registry);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, mut events_rx) = mpsc::channel(agent.config().mailbox_size);

    let mut supervisor = Supervisor::new();
    let _commands = agent.spawn_commands(&mut supervisor, events_tx);
    let discovery_handle = agent.spawn_discovery(shutdown_rx);

    let events_handle = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            info!(event = event.kind(), "Agent event");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = discovery_handle => {
            if let Err(e) = result {
                error!(error = %e, "Discovery task panicked");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    supervisor.stop_all(Duration::from_secs(5)).await;
    events_handle.abort();

    info!("Agent shutdown complete");
    Ok(())
}
