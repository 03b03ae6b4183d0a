//! Lagline server: authoritative tick loop behind a WebSocket endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lagline::app::AppState;
use lagline::config::Config;
use lagline::game::physics::KinematicModel;
use lagline::game::{GameServer, KinematicWorld};
use lagline::http::build_router;
use lagline::session::SessionManager;
use lagline::util::time::ServerClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env()?);

    init_tracing(&config.log_level);

    info!("Starting Lagline server");
    info!(
        tick_rate_hz = config.tick_rate_hz,
        retention_secs = config.snapshot_retention_secs,
        lag_window_secs = config.max_lag_comp_secs,
        interpolated_rewind = config.lag_comp_interpolate,
        "Netcode settings"
    );

    let clock = ServerClock::new();
    let sessions = Arc::new(SessionManager::new(config.idle_timeout()));

    let model = KinematicModel {
        step: config.tick_clock().tick_delta(),
        ..KinematicModel::default()
    };
    let world = KinematicWorld::new(model, config.player_radius, config.world_seed);
    let (server, handle) = GameServer::new(&config, world, sessions.clone(), clock);
    tokio::spawn(server.run());

    let state = AppState::new(config.clone(), sessions, handle, clock);
    let router = build_router(state);

    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
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
