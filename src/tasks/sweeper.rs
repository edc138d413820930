use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::GatewayConfig;
use crate::metrics::{BACKLOG_SIZE, SESSIONS_ACTIVE};
use crate::queue::SessionQueue;
use crate::ratelimit::FixedWindowLimiter;
use crate::session::SessionRegistry;
use crate::websocket::ServerFrame;

/// Background task combining the ping cadence with periodic cleanup:
/// idle connections are closed, expired backlog entries purged, dead
/// sessions retired, and stale rate-limit windows dropped.
pub struct SweeperTask {
    config: GatewayConfig,
    registry: Arc<SessionRegistry>,
    queue: Arc<SessionQueue>,
    limiter: Arc<FixedWindowLimiter>,
    shutdown: broadcast::Receiver<()>,
}

impl SweeperTask {
    pub fn new(
        config: GatewayConfig,
        registry: Arc<SessionRegistry>,
        queue: Arc<SessionQueue>,
        limiter: Arc<FixedWindowLimiter>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            queue,
            limiter,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut ping_timer = tokio::time::interval(self.config.ping_interval());
        let mut sweep_timer = tokio::time::interval(self.config.sweep_interval());

        // Skip immediate first tick
        ping_timer.tick().await;
        sweep_timer.tick().await;

        tracing::info!(
            ping_interval_secs = self.config.ping_interval_secs,
            sweep_interval_secs = self.config.sweep_interval_secs,
            connection_timeout_secs = self.config.connection_timeout_secs,
            "Sweeper task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Sweeper task received shutdown signal");
                    break;
                }
                _ = ping_timer.tick() => {
                    self.close_stale_connections();
                    self.send_pings();
                }
                _ = sweep_timer.tick() => {
                    self.sweep();
                }
            }
        }

        tracing::info!("Sweeper task stopped");
    }

    /// Enqueue a server `ping` to every authenticated connection.
    fn send_pings(&self) {
        let connections = self.registry.authenticated_connections();
        if connections.is_empty() {
            return;
        }

        for handle in &connections {
            handle.enqueue(ServerFrame::ping(&handle.session_id));
        }
        tracing::debug!(count = connections.len(), "Sent ping frames");
    }

    /// Close connections past the inactivity timeout; their handlers
    /// observe the closed outbound queue and unregister themselves.
    /// Runs on the ping cadence so a silent connection is caught within
    /// one ping interval of the timeout.
    fn close_stale_connections(&self) -> usize {
        let stale = self
            .registry
            .stale_connections(self.config.connection_timeout_secs as i64);
        for handle in &stale {
            tracing::info!(
                connection_id = %handle.id,
                session_id = %handle.session_id,
                idle_secs = handle.idle_seconds(),
                "Closing idle connection"
            );
            handle.close();
        }
        stale.len()
    }

    /// One cleanup pass over backlogs, sessions, and rate-limit windows.
    fn sweep(&self) {
        let expired = self.queue.cleanup_expired();

        let removed_sessions = self
            .registry
            .sweep_idle_sessions(self.config.session_idle_ttl_secs as i64, |session_id| {
                self.queue.is_empty(session_id)
            });

        // Windows with no traffic for two full windows are dead weight.
        let stale_windows = self.limiter.cleanup_stale(self.config.rate_limit_window() * 2);

        SESSIONS_ACTIVE.set(self.registry.session_count() as i64);
        BACKLOG_SIZE.set(self.queue.stats().total_messages as i64);

        if expired > 0 || removed_sessions > 0 || stale_windows > 0 {
            tracing::info!(
                expired_messages = expired,
                removed_sessions,
                stale_windows,
                "Sweep completed"
            );
        }
    }
}
