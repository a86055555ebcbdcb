//! Backend for the airplane shooter browser game.
//!
//!
//!
//! # General Infrastructure
//! - Browser loads the game page and sprites from this server
//! - At game over the client posts its score to `/api/score`
//! - The server appends the score to the leaderboard store and answers with its sequence index
//! - Store is any Redis reachable through `STORE_ENDPOINT`, or `memory://` for local play
//!
//!
//!
//! # Leaderboard Indices
//!
//! **Goal**: every accepted score gets a unique index, 1, 2, 3, ... in commit order.
//!
//! - Store has no counter we rely on, only create-if-absent and a max query
//! - Read max, write `max + 1` under id `score-{index}`
//! - Concurrent writers that read the same max collide on the id, one wins
//! - Losers start over against the new max, bounded by `LEDGER_MAX_ATTEMPTS`
//! - Exhausted retries answer `409`, never a silent duplicate
//!
//! See [`ledger`] for the protocol and [`database`] for the Redis layout.
//!
//!
//!
//! # Notes
//!
//! ## Lazy Store
//! The server starts without touching the store. The first score submission opens the
//! connection and bootstraps the database/container, so a missing `STORE_ENDPOINT` or
//! `STORE_KEY` shows up as a `500` on that request instead of a crash at boot.
//!
//! ## Static Files
//! Only allow-listed extensions are served from the site root. The game folder tends to
//! hold more than the game.
//!
//!
//!
//! # Setup
//!
//! Run against an in-memory store.
//! ```sh
//! STORE_ENDPOINT=memory:// SITE_DIR=game cargo run
//! ```
//!
//! Run against Redis.
//! ```sh
//! STORE_ENDPOINT=redis://localhost:6379 STORE_KEY=secret cargo run
//! ```
//!
//! Submit a score.
//! ```sh
//! curl -X POST localhost:8000/api/score -H 'content-type: application/json' -d '{"score": 42}'
//! ```
use std::{future::pending, sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::post,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod assets;
pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod routes;
pub mod state;
pub mod store;

use assets::site_router;
use config::Config;
use routes::score_handler;
use state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let site = site_router(&state.config.site_dir, state.config.reload);

    Router::new()
        .route("/api/score", post(score_handler))
        .merge(site)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    if config.reload {
        info!("Reload enabled, static responses are not cached");
    }

    let address = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config);

    info!("Starting server...");
    let app = app(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {e}");
            pending::<()>().await;
        }
        "Ctrl+C"
    };

    let name = first_signal(interrupt, terminate()).await;
    info!("Received {name}, shutting down");
}

#[cfg(unix)]
async fn terminate() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
            "SIGTERM"
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {e}");
            pending().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() -> &'static str {
    pending().await
}

/// Resolves with the name of whichever signal lands first.
async fn first_signal(
    interrupt: impl Future<Output = &'static str>,
    terminate: impl Future<Output = &'static str>,
) -> &'static str {
    tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    }
}
