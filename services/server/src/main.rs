//! Fleet server
//!
//! Runs the operation tracker and the resource factory protocol together with
//! an embedded agent that manages the demo plugin's resources in-process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet_agent::actors::Supervisor;
use fleet_agent::mock::register_demo;
use fleet_agent::{Agent, MockPlugin, PluginRegistry};
use fleet_server::{events, Config, ServerContext};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        operation_timeout_secs = config.operations.default_timeout.as_secs(),
        factory_timeout_secs = config.factory.timeout.as_secs(),
        "Starting fleet server"
    );

    let agent_config = fleet_agent::Config::from_env()?;
    let registry = Arc::new(PluginRegistry::new());
    register_demo(&registry, &MockPlugin::new(), &agent_config.agent_name)?;
    let agent = Agent::new(agent_config, registry);
    info!(agent_id = %agent.id(), "Embedded agent ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::channel(config.mailbox_size);

    let mut supervisor = Supervisor::new();
    let commands = agent.spawn_commands(&mut supervisor, events_tx);
    let discovery_handle = agent.spawn_discovery(shutdown_rx);

    let ctx = ServerContext::new(config, Arc::new(commands));
    let workers = ctx.spawn_workers();
    let pump = events::spawn_event_pump(ctx.clone(), events_rx);

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
    ctx.shutdown().await;
    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "Worker panicked");
        }
    }
    supervisor.stop_all(Duration::from_secs(5)).await;
    pump.abort();

    info!("Server shutdown complete");
    Ok(())
}
