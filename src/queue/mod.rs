//! Per-session message backlog for offline delivery.
//!
//! When a publish finds no eligible connection, the event is stored here
//! and replayed after the next successful authentication. Each session has
//! a bounded `VecDeque` acting as a circular buffer: when full, the oldest
//! message is dropped. Messages past their TTL are never delivered.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::event::Event;
use crate::metrics::{BACKLOG_EXPIRED_TOTAL, MESSAGES_DROPPED_TOTAL, MESSAGES_QUEUED_TOTAL};

/// Backlog configuration, taken from `gateway.*` settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of messages queued per session.
    pub max_queued_messages: usize,
    /// Time-to-live for queued messages in seconds.
    pub message_ttl_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queued_messages: 1000,
            message_ttl_seconds: 3600, // 1 hour
        }
    }
}

/// A message queued for later delivery
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Unique message ID
    pub id: Uuid,
    /// The queued event
    pub event: Event,
    /// When the message was queued
    pub queued_at: DateTime<Utc>,
}

impl QueuedMessage {
    fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            queued_at: Utc::now(),
        }
    }

    /// Check if the message has expired
    pub fn is_expired(&self, ttl_seconds: u64) -> bool {
        self.is_expired_at(Utc::now(), ttl_seconds)
    }

    fn is_expired_at(&self, now: DateTime<Utc>, ttl_seconds: u64) -> bool {
        now.signed_duration_since(self.queued_at).num_seconds() >= ttl_seconds as i64
    }
}

/// Result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued, but the oldest message was dropped to make room.
    DroppedOldest,
}

/// Result of draining a session backlog.
#[derive(Debug, Clone, Default)]
pub struct DrainResult {
    /// Messages still within their TTL, oldest first.
    pub messages: Vec<QueuedMessage>,
    /// Messages discarded because their TTL had passed.
    pub expired: usize,
}

/// Backlog summary for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub sessions_with_backlog: usize,
    pub total_messages: usize,
}

/// Concurrent per-session backlog store.
pub struct SessionQueue {
    queues: DashMap<String, VecDeque<QueuedMessage>>,
    config: QueueConfig,
}

impl SessionQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            queues: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Store an event for later delivery, dropping the oldest entry when
    /// the session backlog is full.
    pub fn enqueue(&self, session_id: &str, event: Event) -> EnqueueOutcome {
        let mut queue = self.queues.entry(session_id.to_string()).or_default();

        let outcome = if queue.len() >= self.config.max_queued_messages {
            if let Some(dropped) = queue.pop_front() {
                MESSAGES_DROPPED_TOTAL.inc();
                tracing::debug!(
                    session_id = %session_id,
                    dropped_id = %dropped.id,
                    "Dropped oldest message from full session backlog"
                );
            }
            EnqueueOutcome::DroppedOldest
        } else {
            EnqueueOutcome::Queued
        };

        queue.push_back(QueuedMessage::new(event));
        MESSAGES_QUEUED_TOTAL.inc();
        outcome
    }

    /// Take the whole backlog for a session, oldest first, discarding
    /// expired messages. The backlog is left empty.
    pub fn drain(&self, session_id: &str) -> DrainResult {
        let messages = match self.queues.remove(session_id) {
            Some((_, queue)) => queue,
            None => return DrainResult::default(),
        };

        let now = Utc::now();
        let ttl = self.config.message_ttl_seconds;
        let mut result = DrainResult::default();
        for message in messages {
            if message.is_expired_at(now, ttl) {
                result.expired += 1;
            } else {
                result.messages.push(message);
            }
        }
        if result.expired > 0 {
            BACKLOG_EXPIRED_TOTAL.inc_by(result.expired as u64);
        }
        result
    }

    /// Remove expired messages from every backlog, dropping now-empty
    /// backlogs. Returns the number of messages removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let ttl = self.config.message_ttl_seconds;
        let mut removed = 0;

        self.queues.retain(|_, queue| {
            // FIFO by enqueue time, so expired messages form a prefix.
            while queue
                .front()
                .map(|m| m.is_expired_at(now, ttl))
                .unwrap_or(false)
            {
                queue.pop_front();
                removed += 1;
            }
            !queue.is_empty()
        });

        if removed > 0 {
            BACKLOG_EXPIRED_TOTAL.inc_by(removed as u64);
        }
        removed
    }

    pub fn is_empty(&self, session_id: &str) -> bool {
        self.len(session_id) == 0
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.queues.get(session_id).map(|q| q.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> QueueStats {
        let mut total = 0;
        let mut sessions = 0;
        for entry in self.queues.iter() {
            if !entry.is_empty() {
                sessions += 1;
                total += entry.len();
            }
        }
        QueueStats {
            sessions_with_backlog: sessions,
            total_messages: total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn event(n: u64) -> Event {
        Event::new(EventKind::ChatStream, "s1", json!({"seq": n}))
    }

    fn seq(message: &QueuedMessage) -> u64 {
        message.event.data["seq"].as_u64().unwrap()
    }

    #[test]
    fn enqueue_and_drain_preserves_fifo_order() {
        let queue = SessionQueue::new(QueueConfig::default());
        for n in 0..5 {
            assert_eq!(queue.enqueue("s1", event(n)), EnqueueOutcome::Queued);
        }

        let result = queue.drain("s1");
        assert_eq!(result.expired, 0);
        let order: Vec<u64> = result.messages.iter().map(seq).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drain_leaves_backlog_empty() {
        let queue = SessionQueue::new(QueueConfig::default());
        queue.enqueue("s1", event(1));
        queue.drain("s1");
        assert!(queue.is_empty("s1"));
        assert!(queue.drain("s1").messages.is_empty());
    }

    #[test]
    fn overflow_keeps_newest_messages() {
        let queue = SessionQueue::new(QueueConfig {
            max_queued_messages: 3,
            ..Default::default()
        });
        for n in 0..5 {
            queue.enqueue("s1", event(n));
        }
        assert_eq!(queue.len("s1"), 3);

        let order: Vec<u64> = queue.drain("s1").messages.iter().map(seq).collect();
        assert_eq!(order, vec![2, 3, 4]);
    }

    #[test]
    fn overflow_reports_dropped_oldest() {
        let queue = SessionQueue::new(QueueConfig {
            max_queued_messages: 1,
            ..Default::default()
        });
        assert_eq!(queue.enqueue("s1", event(0)), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue("s1", event(1)), EnqueueOutcome::DroppedOldest);
    }

    #[test]
    fn expired_messages_are_never_delivered() {
        let queue = SessionQueue::new(QueueConfig {
            message_ttl_seconds: 0, // everything expires immediately
            ..Default::default()
        });
        queue.enqueue("s1", event(0));
        queue.enqueue("s1", event(1));

        let result = queue.drain("s1");
        assert!(result.messages.is_empty());
        assert_eq!(result.expired, 2);
    }

    #[test]
    fn mixed_expiry_keeps_fresh_messages() {
        let queue = SessionQueue::new(QueueConfig {
            message_ttl_seconds: 60,
            ..Default::default()
        });
        queue.enqueue("s1", event(0));
        // age the first message past the TTL
        {
            let mut backlog = queue.queues.get_mut("s1").unwrap();
            backlog[0].queued_at = Utc::now() - ChronoDuration::seconds(120);
        }
        queue.enqueue("s1", event(1));

        let result = queue.drain("s1");
        assert_eq!(result.expired, 1);
        assert_eq!(result.messages.len(), 1);
        assert_eq!(seq(&result.messages[0]), 1);
    }

    #[test]
    fn cleanup_purges_expired_and_empty_backlogs() {
        let queue = SessionQueue::new(QueueConfig {
            message_ttl_seconds: 0,
            ..Default::default()
        });
        queue.enqueue("s1", event(0));
        queue.enqueue("s2", event(1));

        assert_eq!(queue.cleanup_expired(), 2);
        assert_eq!(queue.stats().sessions_with_backlog, 0);
        assert_eq!(queue.stats().total_messages, 0);
    }

    #[test]
    fn sessions_are_isolated() {
        let queue = SessionQueue::new(QueueConfig::default());
        queue.enqueue("s1", event(0));
        queue.enqueue("s2", event(1));

        assert_eq!(queue.drain("s1").messages.len(), 1);
        assert_eq!(queue.len("s2"), 1);
    }
}
