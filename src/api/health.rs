//! Health check, statistics, and Prometheus endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::metrics;
use crate::queue::QueueStats;
use crate::ratelimit::RateLimiterStats;
use crate::server::AppState;
use crate::session::RegistryStats;
use crate::stats::GatewayStatsSnapshot;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: ConnectionHealthResponse,
    pub queue: QueueHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub active: usize,
    pub sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct QueueHealthResponse {
    pub sessions_with_backlog: usize,
    pub total_messages: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub registry: RegistryStats,
    pub counters: GatewayStatsSnapshot,
    pub queue: QueueStats,
    pub rate_limiter: RateLimiterStats,
}

/// GET /healthz - liveness and summary
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry_stats = state.registry.stats();
    let queue_stats = state.queue.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connections: ConnectionHealthResponse {
            active: registry_stats.active_connections,
            sessions: registry_stats.active_sessions,
        },
        queue: QueueHealthResponse {
            sessions_with_backlog: queue_stats.sessions_with_backlog,
            total_messages: queue_stats.total_messages,
        },
    })
}

/// GET /stats - full gateway statistics
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        registry: state.registry.stats(),
        counters: state.stats.snapshot(),
        queue: state.queue.stats(),
        rate_limiter: state.limiter.stats(),
    })
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    // Refresh gauges derived from live structures before encoding
    let registry_stats = state.registry.stats();
    metrics::SESSIONS_ACTIVE.set(registry_stats.active_sessions as i64);
    metrics::BACKLOG_SIZE.set(state.queue.stats().total_messages as i64);

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
