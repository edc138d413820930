//! Per-connection fixed-window rate limiter for inbound messages.
//!
//! Windows reset strictly at the boundary (no sliding). A connection that
//! exceeds the cap gets its message dropped and a violation recorded; once
//! violations within the current window reach the configured threshold the
//! caller force-closes the connection.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

/// Limiter configuration, taken from `gateway.*` settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Messages allowed per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
    /// Violations within one window before the connection is closed.
    pub violation_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
            violation_threshold: 10,
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Message accepted.
    Allowed { remaining: u32 },
    /// Message rejected; connection stays open.
    Limited { violations: u32 },
    /// Message rejected and the violation threshold was reached; the
    /// connection should be closed.
    Escalate,
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

struct WindowEntry {
    count: u32,
    violations: u32,
    window_start: Instant,
    last_seen: Instant,
}

impl WindowEntry {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            violations: 0,
            window_start: now,
            last_seen: now,
        }
    }
}

pub struct FixedWindowLimiter {
    windows: DashMap<Uuid, WindowEntry>,
    config: RateLimitConfig,
}

impl FixedWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one inbound message against the connection's current window.
    pub fn check(&self, connection_id: Uuid) -> RateDecision {
        self.check_at(connection_id, Instant::now())
    }

    fn check_at(&self, connection_id: Uuid, now: Instant) -> RateDecision {
        let mut entry = self
            .windows
            .entry(connection_id)
            .or_insert_with(|| WindowEntry::new(now));

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.violations = 0;
            entry.window_start = now;
        }
        entry.last_seen = now;

        if entry.count < self.config.limit {
            entry.count += 1;
            RateDecision::Allowed {
                remaining: self.config.limit - entry.count,
            }
        } else {
            entry.violations += 1;
            if entry.violations >= self.config.violation_threshold {
                RateDecision::Escalate
            } else {
                RateDecision::Limited {
                    violations: entry.violations,
                }
            }
        }
    }

    /// Drop the window for a closed connection.
    pub fn remove(&self, connection_id: Uuid) {
        self.windows.remove(&connection_id);
    }

    /// Remove windows with no activity for `ttl`. Returns how many were
    /// dropped.
    pub fn cleanup_stale(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.windows.retain(|_, entry| {
            if now.duration_since(entry.last_seen) >= ttl {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            tracked_connections: self.windows.len(),
            limit: self.config.limit,
            window_secs: self.config.window.as_secs(),
        }
    }
}

/// Statistics about the rate limiter
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub tracked_connections: usize,
    pub limit: u32,
    pub window_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, threshold: u32) -> FixedWindowLimiter {
        FixedWindowLimiter::new(RateLimitConfig {
            limit,
            window: Duration::from_secs(60),
            violation_threshold: threshold,
        })
    }

    #[test]
    fn allows_up_to_limit_then_denies() {
        let limiter = limiter(3, 10);
        let id = Uuid::new_v4();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at(id, now).is_allowed());
        }
        assert_eq!(limiter.check_at(id, now), RateDecision::Limited { violations: 1 });
        assert_eq!(limiter.check_at(id, now), RateDecision::Limited { violations: 2 });
    }

    #[test]
    fn window_boundary_resets_counts() {
        let limiter = limiter(2, 10);
        let id = Uuid::new_v4();
        let start = Instant::now();

        assert!(limiter.check_at(id, start).is_allowed());
        assert!(limiter.check_at(id, start).is_allowed());
        assert!(!limiter.check_at(id, start).is_allowed());

        // one tick past the boundary: full quota again, violations cleared
        let next_window = start + Duration::from_secs(60);
        assert_eq!(
            limiter.check_at(id, next_window),
            RateDecision::Allowed { remaining: 1 }
        );
    }

    #[test]
    fn just_inside_window_does_not_reset() {
        let limiter = limiter(1, 10);
        let id = Uuid::new_v4();
        let start = Instant::now();

        assert!(limiter.check_at(id, start).is_allowed());
        let almost = start + Duration::from_secs(59);
        assert!(!limiter.check_at(id, almost).is_allowed());
    }

    #[test]
    fn escalates_at_violation_threshold() {
        let limiter = limiter(1, 3);
        let id = Uuid::new_v4();
        let now = Instant::now();

        assert!(limiter.check_at(id, now).is_allowed());
        assert_eq!(limiter.check_at(id, now), RateDecision::Limited { violations: 1 });
        assert_eq!(limiter.check_at(id, now), RateDecision::Limited { violations: 2 });
        assert_eq!(limiter.check_at(id, now), RateDecision::Escalate);
    }

    #[test]
    fn connections_are_limited_independently() {
        let limiter = limiter(1, 10);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let now = Instant::now();

        assert!(limiter.check_at(a, now).is_allowed());
        assert!(!limiter.check_at(a, now).is_allowed());
        assert!(limiter.check_at(b, now).is_allowed());
    }

    #[test]
    fn cleanup_drops_stale_windows() {
        let limiter = limiter(10, 10);
        let id = Uuid::new_v4();
        limiter.check(id);
        assert_eq!(limiter.stats().tracked_connections, 1);

        assert_eq!(limiter.cleanup_stale(Duration::from_secs(0)), 1);
        assert_eq!(limiter.stats().tracked_connections, 0);
    }

    #[test]
    fn remove_forgets_connection() {
        let limiter = limiter(1, 10);
        let id = Uuid::new_v4();
        let now = Instant::now();
        assert!(limiter.check_at(id, now).is_allowed());
        limiter.remove(id);
        assert!(limiter.check_at(id, now).is_allowed());
    }
}
