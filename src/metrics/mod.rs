//! Prometheus metrics for the fan-out gateway.
//!
//! Counters mirror the atomic [`crate::stats::GatewayStats`] fields; gauges
//! for active connections, sessions, and backlog depth are refreshed from the
//! registry when `/metrics` is scraped.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "gateway";

lazy_static! {
    // ============================================================================
    // Connection / session metrics
    // ============================================================================

    /// Currently open WebSocket connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Currently open WebSocket connections"
    ).unwrap();

    /// Total connections accepted since start
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections accepted"
    ).unwrap();

    /// Total connections closed since start
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// Sessions currently tracked by the registry
    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_sessions_active", METRIC_PREFIX),
        "Sessions currently tracked by the registry"
    ).unwrap();

    /// Join attempts rejected because the session was at capacity
    pub static ref CAPACITY_REJECTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_capacity_rejections_total", METRIC_PREFIX),
        "Join attempts rejected because the per-session connection cap was reached"
    ).unwrap();

    // ============================================================================
    // Message metrics
    // ============================================================================

    /// Messages delivered to connection outbound queues, by event kind
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Messages delivered to connection outbound queues",
        &["kind"]
    ).unwrap();

    /// Messages diverted to a session backlog (no eligible connection)
    pub static ref MESSAGES_QUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_queued_total", METRIC_PREFIX),
        "Messages diverted to a session backlog"
    ).unwrap();

    /// Messages dropped by overflow (backlog or outbound queue drop-oldest)
    pub static ref MESSAGES_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_dropped_total", METRIC_PREFIX),
        "Messages dropped by drop-oldest overflow"
    ).unwrap();

    /// Backlog messages replayed to a connection after authentication
    pub static ref BACKLOG_FLUSHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_backlog_flushed_total", METRIC_PREFIX),
        "Backlog messages replayed after authentication"
    ).unwrap();

    /// Backlog messages discarded because their TTL expired
    pub static ref BACKLOG_EXPIRED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_backlog_expired_total", METRIC_PREFIX),
        "Backlog messages discarded after TTL expiry"
    ).unwrap();

    /// Total messages currently held in session backlogs
    pub static ref BACKLOG_SIZE: IntGauge = register_int_gauge!(
        format!("{}_backlog_size", METRIC_PREFIX),
        "Messages currently held in session backlogs"
    ).unwrap();

    // ============================================================================
    // Policy metrics
    // ============================================================================

    /// Inbound messages rejected by the rate limiter
    pub static ref RATE_LIMIT_VIOLATIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_rate_limit_violations_total", METRIC_PREFIX),
        "Inbound messages rejected by the per-connection rate limiter"
    ).unwrap();

    /// Failed authentication attempts (bad key or timeout)
    pub static ref AUTH_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_auth_failures_total", METRIC_PREFIX),
        "Failed authentication attempts"
    ).unwrap();

    // ============================================================================
    // Upstream metrics
    // ============================================================================

    /// Upstream adapter errors, by adapter
    pub static ref UPSTREAM_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_upstream_errors_total", METRIC_PREFIX),
        "Upstream adapter errors",
        &["adapter"]
    ).unwrap();

    /// Upstream adapter reconnect attempts, by adapter
    pub static ref UPSTREAM_RECONNECTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_upstream_reconnects_total", METRIC_PREFIX),
        "Upstream adapter reconnect attempts",
        &["adapter"]
    ).unwrap();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        // lazy_static metrics register on first access
        CONNECTIONS_ACTIVE.set(1);

        let result = encode_metrics();
        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.contains("gateway_connections_active"));
    }

    #[test]
    fn test_counters_do_not_panic() {
        MESSAGES_SENT_TOTAL.with_label_values(&["chat_stream"]).inc();
        MESSAGES_QUEUED_TOTAL.inc();
        RATE_LIMIT_VIOLATIONS_TOTAL.inc();
        UPSTREAM_ERRORS_TOTAL.with_label_values(&["cost"]).inc();
    }
}
