mod accrual;
mod api;
mod auth;
mod balance;
mod bootstrap;
mod config;
mod error;
mod ledger;
mod middleware;
mod orders;
mod reconciliation;
mod server;

use clap::Parser;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Cli, Config};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,gophermart=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting loyalty accrual service");

    let cli = Cli::parse();
    let config = Config::load(&cli)?;

    let app = bootstrap::initialize_app(&config).await?;
    let router = server::create_app(app.state.clone(), &config);

    server::run_server(router, &config.run_address).await?;

    info!("🛑 HTTP server stopped, draining reconciliation workers");
    app.shutdown(Duration::from_secs(config.shutdown_grace_secs))
        .await;

    info!("👋 Shutdown complete");
    Ok(())
}
