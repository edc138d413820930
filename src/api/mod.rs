mod health;

pub use health::{health, prometheus_metrics, stats};

use axum::{routing::get, Router};

use crate::server::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
}
