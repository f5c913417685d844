use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::{api, AppState};

/// Admin HTTP surface (spec.md §6). Grounded on the teacher's
/// `start_dashboard_server` — same CORS layer and axum `Router` idiom, but
/// trimmed to exactly the JSON routes spec.md §6 names, with no HTML
/// dashboard (the teacher's embedded-HTML page has no spec counterpart).
pub async fn start_admin_server(state: AppState, bind_addr: SocketAddr) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/health", get(api::health_check))
        .route("/api/portfolio", get(api::get_portfolio))
        .route("/api/trades", get(api::get_trades))
        .route("/api/cycles", get(api::get_cycles))
        .route("/api/alerts", get(api::get_alerts))
        .route("/api/performance", get(api::get_performance))
        .route("/api/performance/refresh", post(api::post_performance_refresh))
        .route("/api/force-close", post(api::post_force_close))
        .route("/api/bot-control", post(api::post_bot_control).get(api::get_bot_control))
        .layer(cors)
        .with_state(state);

    info!(%bind_addr, "admin HTTP surface starting");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
