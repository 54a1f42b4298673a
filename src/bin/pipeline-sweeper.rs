//! # Pipeline Sweeper
//!
//! Service process for the background side of the pipeline: applies database
//! migrations, provisions the RabbitMQ queues, then runs the stall sweeper
//! until Ctrl-C.
//!
//! Configuration comes from `config/pipeline*.yaml` and `PIPELINE__*`
//! environment variables; see [`media_pipeline::config`].

use anyhow::Context;
use media_pipeline::config::ConfigManager;
use media_pipeline::logging::init_structured_logging;
use media_pipeline::orchestration::PipelineSystem;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let manager = ConfigManager::load().context("failed to load pipeline configuration")?;
    init_structured_logging(manager.environment(), &manager.config().logging);

    let config = manager.into_config();
    let sweeper_enabled = config.sweeper.enabled;

    let system = PipelineSystem::bootstrap(config)
        .await
        .context("failed to bootstrap pipeline")?;

    if !sweeper_enabled {
        warn!("Sweeper disabled by configuration; provisioning done, exiting");
        return Ok(());
    }

    let mut handle = system.start_sweeper();
    info!("🚀 pipeline-sweeper running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("🛑 Shutdown signal received");

    handle.stop().await;
    Ok(())
}
