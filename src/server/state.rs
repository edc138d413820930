use std::sync::Arc;
use std::time::Instant;

use crate::auth::{KeyValidator, StaticKeyValidator};
use crate::config::Settings;
use crate::queue::{QueueConfig, SessionQueue};
use crate::ratelimit::{FixedWindowLimiter, RateLimitConfig};
use crate::router::MessageRouter;
use crate::session::SessionRegistry;
use crate::stats::GatewayStats;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<SessionRegistry>,
    pub queue: Arc<SessionQueue>,
    pub message_router: Arc<MessageRouter>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub validator: Arc<dyn KeyValidator>,
    pub stats: Arc<GatewayStats>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let gateway = &settings.gateway;
        let registry = Arc::new(SessionRegistry::new(
            gateway.max_connections_per_session,
            gateway.outbound_queue_capacity,
        ));
        let queue = Arc::new(SessionQueue::new(QueueConfig {
            max_queued_messages: gateway.max_queued_messages,
            message_ttl_seconds: gateway.message_queue_ttl_secs,
        }));
        let limiter = Arc::new(FixedWindowLimiter::new(RateLimitConfig {
            limit: gateway.message_rate_limit,
            window: gateway.rate_limit_window(),
            violation_threshold: gateway.rate_limit_violation_threshold,
        }));
        let stats = Arc::new(GatewayStats::new());
        let message_router = Arc::new(MessageRouter::new(
            registry.clone(),
            queue.clone(),
            stats.clone(),
        ));
        let validator: Arc<dyn KeyValidator> =
            Arc::new(StaticKeyValidator::new(settings.auth.api_key.clone()));

        Self {
            settings: Arc::new(settings),
            registry,
            queue,
            message_router,
            limiter,
            validator,
            stats,
            start_time: Instant::now(),
        }
    }
}
