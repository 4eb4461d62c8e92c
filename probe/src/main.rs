//! Lifeline probe server entry point

use clap::Parser;
use lifeline_common::HealthCheckConfig;
use lifeline_probe::cli::{Cli, Commands, ServeArgs};
use lifeline_probe::{logging, server};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config(args)) => {
            let config = load_config(&args);
            match serde_json::to_string_pretty(&config) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Serve(args)) => serve(args).await,
        None => serve(ServeArgs::default()).await,
    }
}

fn load_config(args: &ServeArgs) -> HealthCheckConfig {
    args.apply(HealthCheckConfig::from_env())
}

async fn serve(args: ServeArgs) {
    if let Err(e) = logging::init() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let config = load_config(&args);
    if let Err(e) = config.validate() {
        error!(code = e.code(), error = %e, "Invalid probe configuration");
        std::process::exit(1);
    }

    info!(probes = ?config.enabled_kinds(), "Starting lifeline probe server");

    let ctx = CancellationToken::new();
    tokio::spawn(server::shutdown_signal(ctx.clone()));

    match server::run(&config, ctx).await {
        Ok(statuses) => {
            let mut failed = false;
            for status in &statuses {
                if status.is_failed() {
                    failed = true;
                    error!(probe = %status.kind, state = ?status.state, "Probe listener failed");
                } else {
                    info!(probe = %status.kind, state = ?status.state, "Probe listener stopped");
                }
            }
            if failed {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!(code = e.code(), error = %e, "Probe server error");
            std::process::exit(1);
        }
    }
}
