//! Database migration runner.

use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Runs every pending migration under `./migrations` against the configured
/// database.
pub async fn run_migrations(config: &Config) -> Result<()> {
    info!("connecting to database");

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database.connection_string())
        .await
        .context("failed to connect to database")?;

    info!("running database migrations");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    info!("database migrations completed");
    Ok(())
}
