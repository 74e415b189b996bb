// src/bin/alarm_clear.rs - Clear a named alarm on the registry
use alarm_registry::{Broadcaster, TcpTransport};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "alarm-clear")]
#[command(about = "Clear a named alarm. The registry is located through ALARM_REGISTRY_ADDR.", long_about = None)]
struct Cli {
    /// Name of the alarm to clear
    alarm_name: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    alarm_registry::init();
    let cli = Cli::parse();

    let transport = Arc::new(TcpTransport::from_env());
    let broadcaster = Broadcaster::new(transport, cli.alarm_name.as_str());

    match broadcaster.clear().await {
        Ok(()) => {
            println!("Cleared alarm '{}'", cli.alarm_name);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("alarm-clear: failed to clear '{}': {}", cli.alarm_name, e);
            ExitCode::FAILURE
        }
    }
}
