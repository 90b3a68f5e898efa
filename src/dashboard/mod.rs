//! Dashboard — Axum JSON read surface.
//!
//! Read-only views over line history, signals, bets, and the bankroll
//! ledger. Nothing here writes; all mutation flows through ingest,
//! bet logging, and settlement. CORS enabled for local development.

pub mod routes;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

pub use routes::{AppState, DashboardState};

/// Start the dashboard web server.
///
/// This spawns a background task — it doesn't block.
pub fn spawn_dashboard(state: AppState, port: u16) {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "Dashboard server starting on http://localhost:{port}");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("Failed to bind dashboard port");

        axum::serve(listener, app)
            .await
            .expect("Dashboard server error");
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/events", get(routes::get_events))
        .route("/api/events/:event_id/history", get(routes::get_event_history))
        .route(
            "/api/events/:event_id/signals/steam",
            get(routes::get_event_steam),
        )
        .route("/api/bets", get(routes::get_bets))
        .route("/api/users/:user_id/bankroll", get(routes::get_bankroll))
        .route("/api/users/:user_id/ledger", get(routes::get_ledger))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
