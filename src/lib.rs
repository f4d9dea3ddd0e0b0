mod api;
mod database;
pub mod error;
pub mod models;
pub mod repo;
pub mod response;
mod schema;
pub mod settings;
pub mod telemetry;
pub mod validator;

use anyhow::Context;
use axum::{serve::Serve, Router};
use tokio::net::TcpListener;
use tracing::info;

pub use crate::api::build_api;
pub use crate::database::{create_db_pool, run_migrations, DBPool, DatabaseBookRepo};
pub use crate::settings::Settings;

use crate::validator::BookValidator;

pub async fn start_server(
    settings: Settings,
) -> anyhow::Result<Serve<TcpListener, Router, Router>> {
    if settings.database.run_migrations {
        let applied = run_migrations(settings.database.connection_string()).await?;
        info!("Executed {} migrations", applied);
    }

    let pool = create_db_pool(&settings.database).await?;
    let validator = BookValidator::new();
    let repo = DatabaseBookRepo::new(pool, validator.clone());

    let router = build_api(repo, validator);

    let address = settings.server.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    let local_addr = listener.local_addr()?;
    info!("Listening on {}", local_addr);

    Ok(axum::serve(listener, router))
}
