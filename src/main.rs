//! Plaza Server - presence relay and world sessions for the shared plaza
//!
//! This is the main entry point. It handles:
//! - WebSocket connections relaying player snapshots and actions
//! - HTTP endpoints for health, roster and seat introspection
//! - Headless demo sessions driven by seeded bots
//! - Supabase persistence when configured, in-memory otherwise

mod app;
mod config;
mod http;
mod presence;
mod store;
mod util;
mod world;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::store::{InMemoryWorldStore, SupabaseClient, SupabaseWorldStore, WorldStore};
use crate::util::time::init_server_time;
use crate::world::bot::spawn_bots;
use crate::world::WorldLayout;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Plaza Server");
    info!("Server address: {}", config.server_addr);

    let store: Arc<dyn WorldStore> = match &config.supabase {
        Some(supabase) => Arc::new(SupabaseWorldStore::new(SupabaseClient::new(supabase))),
        None => {
            warn!("SUPABASE_URL not set, positions and seats are kept in memory");
            Arc::new(InMemoryWorldStore::new())
        }
    };

    let layout = match &config.world_layout_path {
        Some(path) => {
            info!(path = %path.display(), "Loading world layout");
            WorldLayout::from_json_file(path)?
        }
        None => WorldLayout::standard(),
    };

    // Create application state
    let state = AppState::new(config.clone(), store, layout);
    info!(store = state.store.backend(), "World store ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn presence hub
    let hub_task = tokio::spawn(state.hub.clone().run(shutdown_rx.clone()));

    // Spawn demo players
    let bots = spawn_bots(
        config.bot_count,
        config.bot_seed,
        config.quality_tier,
        state.session_deps(),
        state.sessions.clone(),
        shutdown_rx,
    );
    if !bots.is_empty() {
        info!(count = bots.len(), "Demo bots started");
    }

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let sessions release seats and go offline before exiting
    let _ = shutdown_tx.send(true);
    for bot in bots {
        if let Err(e) = bot.await {
            warn!(error = %e, "Bot task ended abnormally");
        }
    }
    let _ = hub_task.await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let (text_layer, json_layer) = if json {
        (
            None,
            Some(tracing_subscriber::fmt::layer().json().with_target(true)),
        )
    } else {
        (
            Some(tracing_subscriber::fmt::layer().with_target(true)),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer)
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
