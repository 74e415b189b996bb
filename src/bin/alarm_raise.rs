// src/bin/alarm_raise.rs - Raise a named alarm on the registry
use alarm_registry::{Broadcaster, Severity, TcpTransport};
use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "alarm-raise")]
#[command(about = "Raise a named alarm. The registry is located through ALARM_REGISTRY_ADDR.", long_about = None)]
struct Cli {
    /// Name of the alarm to raise
    alarm_name: String,

    /// Convention-defined severity (0 = info)
    #[arg(short, long, default_value = "1")]
    severity: Severity,

    /// Human-readable problem description
    #[arg(short, long, default_value = "")]
    description: String,

    /// JSON payload attached to the alarm
    #[arg(short, long, default_value = "")]
    parameters: String,
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    if !cli.parameters.is_empty() {
        serde_json::from_str::<serde_json::Value>(&cli.parameters)
            .context("--parameters is not valid JSON")?;
    }

    let transport = Arc::new(TcpTransport::from_env());
    Broadcaster::new(transport, cli.alarm_name.as_str())
        .raise(cli.description.as_str(), cli.parameters.as_str(), cli.severity)
        .await
        .with_context(|| format!("failed to raise '{}'", cli.alarm_name))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    alarm_registry::init();
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(()) => {
            println!(
                "Raised alarm '{}' at severity {}",
                cli.alarm_name, cli.severity
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("alarm-raise: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
