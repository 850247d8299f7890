use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::auth::{generate_jwt, Claims};
use crate::config::AppConfig;
use crate::database::Database;
use crate::session::{open_session, sweep_expired, SessionSweeper};
use crate::state::AppState;
use crate::storage::LocalFileStore;

#[derive(Parser)]
#[command(name = "inventory-api")]
#[command(about = "Inventory record service: Alta/Baja batches with audit trail")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP API")]
    Serve {
        #[arg(long, env = "PORT", default_value_t = 3000, help = "Port to listen on")]
        port: u16,
    },

    #[command(about = "Apply the database schema")]
    Migrate,

    #[command(about = "Open a session for a user and print a bearer token")]
    IssueToken {
        #[arg(long, help = "User id")]
        user: i64,
        #[arg(long, default_value_t = 8, help = "Session lifetime in hours")]
        hours: i64,
    },

    #[command(about = "Deactivate expired sessions once and exit")]
    Sweep,
}

pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    let db = Database::connect(&config.database).await.context("failed to open database")?;

    match cli.command {
        Commands::Serve { port } => serve(config, db, port).await,
        Commands::Migrate => {
            db.migrate().await.context("migration failed")?;
            println!("Schema applied ({})", db.backend());
            Ok(())
        }
        Commands::IssueToken { user, hours } => {
            let ttl = chrono::Duration::hours(hours);
            let session = open_session(&db, user, ttl).await?;
            let token = generate_jwt(&Claims::new(user, session.id_session, ttl), &config.security.jwt_secret)?;
            println!("{}", token);
            Ok(())
        }
        Commands::Sweep => {
            let count = sweep_expired(&db).await?;
            println!("Deactivated {} expired session(s)", count);
            Ok(())
        }
    }
}

async fn serve(config: AppConfig, db: Database, port: u16) -> anyhow::Result<()> {
    let sweep_interval = Duration::from_secs(config.sessions.sweep_interval_secs.max(1));
    let file_store = Arc::new(LocalFileStore::new(&config.storage.root));
    let state = AppState::build(config, db.clone(), file_store)?;

    let sweeper = SessionSweeper::new(db, sweep_interval).start();

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("Inventory API listening on http://{}", bind_addr);

    axum::serve(listener, crate::app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    sweeper.stop().await;
    Ok(())
}
