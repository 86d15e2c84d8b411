//! WebAuthn relying-party service — CLI entry point.
//!
//! Commands:
//!   serve   - Start the HTTP server (default)
//!   migrate - Run database migrations only

use anyhow::Result;
use clap::{Parser, Subcommand};
use mpo_authn_server::{config::Config, migration, server, telemetry};
use tracing::info;

#[derive(Parser)]
#[command(name = "mpo-authn-server")]
#[command(about = "WebAuthn relying-party service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Run database migrations only
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    telemetry::init(&config.telemetry);

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Migrate) => {
            info!("running database migrations");
            migration::run_migrations(&config).await?;
            info!("migrations completed successfully");
        }
        Some(Commands::Serve) | None => {
            info!("starting webauthn relying-party service");
            server::run(config).await?;
        }
    }

    Ok(())
}
