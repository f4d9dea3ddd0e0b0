use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use bookstore_api::settings::{Environment, Settings};
use bookstore_api::{start_server, telemetry};

#[derive(Debug, Parser)]
#[command(name = "bookstore_api", about = "HTTP API for managing a bookstore")]
struct Cli {
    /// Environment overlay to load from the config directory
    #[arg(long, value_enum, env = "BOOKSTORE_ENV", default_value_t = Environment::Dev)]
    env: Environment,

    /// Directory holding base.toml and the <env>.toml overlays
    #[arg(long, default_value = "./config")]
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.env, &cli.config_dir)?;
    telemetry::init(&settings.log);
    info!(env = cli.env.as_str(), config_dir = %cli.config_dir.display(), "Loaded settings");

    let server = start_server(settings).await?;
    server.with_graceful_shutdown(shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
