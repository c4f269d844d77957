//! # courier-server
//!
//! Real-time chat server for the Courier network.
//!
//! This binary provides:
//! - **REST API** (axum) for contacts, conversations, message sending,
//!   group management, and read receipts
//! - **WebSocket fan-out** for presence snapshots, new-message pushes,
//!   read-receipt deltas, and typing signals
//! - **SQLite persistence** through `courier-store`
//! - **Image hosting** for inline message images and group avatars

mod api;
mod auth;
mod config;
mod delivery;
mod error;
mod images;
mod presence;
mod receipts;
mod rooms;
mod typing;
mod ws;

use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::images::ImageStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier_server=debug")),
        )
        .init();

    info!("Starting Courier server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        addr = %config.http_addr,
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    let database = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    // Image store (creates directory if missing)
    let images = ImageStore::new(config.image_storage_path.clone(), config.max_image_size).await?;

    let http_addr = config.http_addr;
    let app_state = AppState::new(database, images, config);

    // -----------------------------------------------------------------------
    // 4. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the server or a shutdown signal
    // arrives, we exit cleanly.
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
