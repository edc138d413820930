//! Message router: delivers events to eligible connections of a session,
//! with a backlog fallback when none are eligible.

use std::sync::Arc;

use crate::event::{Event, EventKind};
use crate::metrics::{BACKLOG_FLUSHED_TOTAL, MESSAGES_DROPPED_TOTAL, MESSAGES_SENT_TOTAL};
use crate::queue::SessionQueue;
use crate::session::{ConnectionHandle, PushOutcome, SessionRegistry};
use crate::stats::GatewayStats;
use crate::websocket::ServerFrame;

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Delivered to at least one connection's outbound queue.
    Delivered { connections: usize, evicted: usize },
    /// No eligible connection; the event went to the session backlog.
    Queued { evicted_oldest: bool },
}

/// Result of replaying a session backlog into one connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushResult {
    pub flushed: usize,
    pub expired: usize,
    /// Frames evicted from the connection's outbound queue during replay.
    pub evicted: usize,
}

/// Routes published events. Publishing is synchronous and never blocks on
/// slow consumers; every push is a non-blocking drop-oldest enqueue.
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
    queue: Arc<SessionQueue>,
    stats: Arc<GatewayStats>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        queue: Arc<SessionQueue>,
        stats: Arc<GatewayStats>,
    ) -> Self {
        Self {
            registry,
            queue,
            stats,
        }
    }

    /// Deliver an event to every eligible connection of its session, or
    /// queue it in the session backlog when none is eligible. The session
    /// is created implicitly if this is the first publish for it.
    pub fn publish(&self, event: Event) -> PublishOutcome {
        let session_id = event.session_id.clone();
        let kind = event.kind;
        self.registry.touch_session(&session_id);

        let frame = ServerFrame::from(event.clone());
        match self.registry.fan_out(&session_id, kind, &frame) {
            Some(report) => {
                self.stats.record_sent(report.delivered as u64);
                if report.evicted > 0 {
                    self.stats.record_dropped(report.evicted as u64);
                    MESSAGES_DROPPED_TOTAL.inc_by(report.evicted as u64);
                }
                MESSAGES_SENT_TOTAL
                    .with_label_values(&[kind.as_str()])
                    .inc_by(report.delivered as u64);
                tracing::trace!(
                    session_id = %session_id,
                    kind = %kind,
                    connections = report.delivered,
                    "Event delivered"
                );
                PublishOutcome::Delivered {
                    connections: report.delivered,
                    evicted: report.evicted,
                }
            }
            None => {
                let outcome = self.queue.enqueue(&session_id, event);
                self.stats.record_queued();
                let evicted_oldest = outcome == crate::queue::EnqueueOutcome::DroppedOldest;
                if evicted_oldest {
                    self.stats.record_dropped(1);
                }
                tracing::debug!(
                    session_id = %session_id,
                    kind = %kind,
                    "No eligible connection, event queued"
                );
                PublishOutcome::Queued { evicted_oldest }
            }
        }
    }

    /// Publish the same payload to every known session, live or
    /// backlog-only.
    pub fn broadcast(&self, kind: EventKind, data: serde_json::Value) {
        let session_ids = self.registry.session_ids();
        tracing::debug!(kind = %kind, sessions = session_ids.len(), "Broadcasting event");
        for session_id in session_ids {
            self.publish(Event::new(kind, session_id, data.clone()));
        }
    }

    /// Replay the session backlog into a freshly authenticated connection,
    /// oldest first. Expired messages are discarded, never delivered.
    pub fn flush_backlog(&self, handle: &ConnectionHandle) -> FlushResult {
        let drained = self.queue.drain(&handle.session_id);
        let mut result = FlushResult {
            expired: drained.expired,
            ..Default::default()
        };

        for message in drained.messages {
            match handle.enqueue(ServerFrame::from(message.event)) {
                PushOutcome::Queued => result.flushed += 1,
                PushOutcome::DroppedOldest => {
                    result.flushed += 1;
                    result.evicted += 1;
                }
                PushOutcome::Closed => break,
            }
        }

        if result.flushed > 0 {
            self.stats.record_sent(result.flushed as u64);
            BACKLOG_FLUSHED_TOTAL.inc_by(result.flushed as u64);
        }
        if result.evicted > 0 {
            self.stats.record_dropped(result.evicted as u64);
            MESSAGES_DROPPED_TOTAL.inc_by(result.evicted as u64);
        }
        if result.flushed > 0 || result.expired > 0 {
            tracing::info!(
                session_id = %handle.session_id,
                connection_id = %handle.id,
                flushed = result.flushed,
                expired = result.expired,
                "Replayed session backlog"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueConfig;
    use serde_json::json;

    fn setup(cap: usize) -> (Arc<SessionRegistry>, Arc<SessionQueue>, MessageRouter) {
        let registry = Arc::new(SessionRegistry::new(cap, 16));
        let queue = Arc::new(SessionQueue::new(QueueConfig::default()));
        let stats = Arc::new(GatewayStats::new());
        let router = MessageRouter::new(registry.clone(), queue.clone(), stats);
        (registry, queue, router)
    }

    fn chat_event(session_id: &str, n: u64) -> Event {
        Event::new(EventKind::ChatStream, session_id, json!({"seq": n}))
    }

    #[test]
    fn publish_reaches_all_eligible_connections() {
        let (registry, _, router) = setup(5);
        let a = registry.join("s1").unwrap();
        let b = registry.join("s1").unwrap();
        a.set_authenticated();
        b.set_authenticated();

        let outcome = router.publish(chat_event("s1", 1));
        assert_eq!(
            outcome,
            PublishOutcome::Delivered {
                connections: 2,
                evicted: 0
            }
        );
        assert_eq!(a.outbound.len(), 1);
        assert_eq!(b.outbound.len(), 1);
    }

    #[test]
    fn publish_without_connections_queues() {
        let (_, queue, router) = setup(5);
        let outcome = router.publish(chat_event("s1", 1));
        assert_eq!(
            outcome,
            PublishOutcome::Queued {
                evicted_oldest: false
            }
        );
        assert_eq!(queue.len("s1"), 1);
    }

    #[test]
    fn publish_to_unauthenticated_connection_queues() {
        let (registry, queue, router) = setup(5);
        let _pending = registry.join("s1").unwrap();
        router.publish(chat_event("s1", 1));
        assert_eq!(queue.len("s1"), 1);
    }

    #[test]
    fn filtered_out_events_fall_back_to_backlog() {
        let (registry, queue, router) = setup(5);
        let conn = registry.join("s1").unwrap();
        conn.set_authenticated();
        conn.subscribe(&[EventKind::CostUpdate]);

        router.publish(chat_event("s1", 1));
        assert_eq!(conn.outbound.len(), 0);
        assert_eq!(queue.len("s1"), 1);
    }

    #[test]
    fn flush_backlog_delivers_fifo_and_empties_queue() {
        let (registry, queue, router) = setup(5);
        for n in 0..3 {
            router.publish(chat_event("s1", n));
        }

        let conn = registry.join("s1").unwrap();
        conn.set_authenticated();
        let result = router.flush_backlog(&conn);
        assert_eq!(result.flushed, 3);
        assert_eq!(result.expired, 0);
        assert!(queue.is_empty("s1"));
        assert_eq!(conn.outbound.len(), 3);
    }

    #[test]
    fn broadcast_covers_live_and_backlog_sessions() {
        let (registry, queue, router) = setup(5);
        let live = registry.join("live").unwrap();
        live.set_authenticated();
        router.publish(chat_event("offline", 1)); // creates backlog-only session

        router.broadcast(EventKind::CostUpdate, json!({"current_cost": 1.0}));

        assert_eq!(live.outbound.len(), 1);
        assert_eq!(queue.len("offline"), 2);
    }

    #[test]
    fn sessions_do_not_cross_talk() {
        let (registry, _, router) = setup(5);
        let s1 = registry.join("s1").unwrap();
        let s2 = registry.join("s2").unwrap();
        s1.set_authenticated();
        s2.set_authenticated();

        router.publish(chat_event("s1", 1));
        assert_eq!(s1.outbound.len(), 1);
        assert_eq!(s2.outbound.len(), 0);
    }
}
