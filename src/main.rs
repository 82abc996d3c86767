use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use storefront::config::Config;
use storefront::observability::{init_logging, metrics};
use storefront::server::{start_server, AppState};
use storefront::services::Services;
use storefront::tasks::{spawn_recovery_sweep, sweep_once};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "storefront")]
#[command(about = "Order, payment and entitlement engine for a digital bookstore")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the background recovery sweep
    Serve {
        /// Path to the config file (defaults to storefront.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run one recovery sweep and exit
    Sweep {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load storefront.toml")?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let config = load_config(config)?;
            if let Err(e) = metrics::init() {
                warn!("Metrics disabled: {}", e);
            }

            let services = Services::from_config(&config)?;
            let sweeper = spawn_recovery_sweep(
                services.checkout.clone(),
                Duration::from_secs(config.checkout.sweep_interval_secs.max(1)),
            );

            let state = AppState::new(services, &config.server.auth_header);
            let served = start_server(state, config.server.port).await;
            sweeper.abort();
            served.map_err(|e| anyhow::anyhow!("HTTP server failed: {e}"))?;
            info!("Server stopped");
        }
        Commands::Sweep { config } => {
            let config = load_config(config)?;
            let services = Services::from_config(&config)?;
            let report = sweep_once(&services.checkout)
                .await
                .context("Recovery sweep failed")?;
            println!(
                "refulfilled={} reconciled={} expired={} errors={}",
                report.refulfilled, report.reconciled, report.expired, report.errors
            );
        }
    }

    Ok(())
}
