use anyhow::Context;
use clap::Parser;
use lifecycle_manager::api::{self, SharedManager};
use lifecycle_manager::config::{BackendKind, ManagerConfig};
use lifecycle_manager::runtime::build_backend;
use lifecycle_manager::LifecycleManager;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "lifecycle-manager")]
#[command(about = "Monitors lifecycle nodes and serves the dashboard API")]
struct Args {
    /// TOML config file (default: ./lifecycle-manager.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `api_port`
    #[arg(short, long)]
    port: Option<u16>,

    /// Overrides `backend`
    #[arg(short, long, value_enum)]
    backend: Option<BackendKind>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ManagerConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(port) = args.port {
        config.api_port = port;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();
    info!("=== Lifecycle Manager Starting ===");
    info!(
        "Backend: {:?}, update rate: {} Hz, call timeout: {}ms",
        config.backend, config.update_freq_hz, config.call_timeout_ms
    );

    let manager: SharedManager = Arc::new(LifecycleManager::new(build_backend(&config), &config));
    let handle = Arc::clone(&manager).start();

    tokio::select! {
        result = api::run_api_server(manager, config.api_port) => {
            if let Err(e) = &result {
                error!("API server failed: {:#}", e);
            }
            handle.shutdown().await;
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            handle.shutdown().await;
            Ok(())
        }
    }
}
