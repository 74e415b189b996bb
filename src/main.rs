// src/main.rs - Registry server process
use alarm_registry::{build_info, AlarmRegistry, AlarmServer, RegistryConfig};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "alarm-registry")]
#[command(about = "Run the alarm registry server", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides server.bind from the configuration
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    alarm_registry::init();
    let cli = Cli::parse();

    info!("Alarm registry v{} starting", build_info::summary());

    let mut config = match &cli.config {
        Some(path) => RegistryConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RegistryConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    info!("Loaded {} meta alarms", config.meta_alarms.len());

    let registry = AlarmRegistry::from_config(&config)?;
    let server = AlarmServer::bind(registry.clone(), &config.server).await?;

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };
    server.run_until(shutdown).await?;

    let stats = registry.router().stats();
    info!(
        "Final stats: {} alarms, {} delivered, {} retried, {} failed, {} dropped",
        registry.len(),
        stats.delivered,
        stats.retried,
        stats.failed,
        stats.dropped
    );
    Ok(())
}
