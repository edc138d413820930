use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event::EventKind;
use crate::session::outbound::{OutboundQueue, PushOutcome};
use crate::websocket::ServerFrame;

/// Connection lifecycle states. Transitions are monotonic:
/// `Authenticating → Authenticated → Closing → Closed`, with the
/// `Authenticated` step skipped when authentication is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Authenticating = 0,
    Authenticated = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Authenticating,
            1 => ConnectionState::Authenticated,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Which event kinds a connection wants delivered.
///
/// A connection starts as `All`. The first `subscribe` narrows it to an
/// explicit set; `unsubscribe` from `All` materializes the complement.
/// An explicit empty set delivers nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFilter {
    All,
    Explicit(HashSet<EventKind>),
}

impl SubscriptionFilter {
    pub fn allows(&self, kind: EventKind) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Explicit(kinds) => kinds.contains(&kind),
        }
    }

    pub fn subscribe(&mut self, kinds: &[EventKind]) {
        match self {
            SubscriptionFilter::All => {
                *self = SubscriptionFilter::Explicit(kinds.iter().copied().collect());
            }
            SubscriptionFilter::Explicit(set) => {
                set.extend(kinds.iter().copied());
            }
        }
    }

    pub fn unsubscribe(&mut self, kinds: &[EventKind]) {
        match self {
            SubscriptionFilter::All => {
                let remaining: HashSet<EventKind> = EventKind::ALL
                    .iter()
                    .copied()
                    .filter(|kind| !kinds.contains(kind))
                    .collect();
                *self = SubscriptionFilter::Explicit(remaining);
            }
            SubscriptionFilter::Explicit(set) => {
                for kind in kinds {
                    set.remove(kind);
                }
            }
        }
    }
}

/// Shared handle for one WebSocket connection.
///
/// Cloned into the writer task, the registry, and the sweeper; all state
/// is atomic or behind short-lived locks never held across an await.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    pub outbound: OutboundQueue,
    state: AtomicU8,
    filter: RwLock<SubscriptionFilter>,
    last_activity: AtomicI64,
    messages_received: AtomicU64,
}

impl ConnectionHandle {
    pub fn new(session_id: impl Into<String>, outbound_capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            connected_at: now,
            outbound: OutboundQueue::new(outbound_capacity),
            state: AtomicU8::new(ConnectionState::Authenticating as u8),
            filter: RwLock::new(SubscriptionFilter::All),
            last_activity: AtomicI64::new(now.timestamp()),
            messages_received: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    /// Transition `Authenticating → Authenticated`. Returns `false` if the
    /// connection was already past the authenticating state.
    pub fn set_authenticated(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Authenticating as u8,
                ConnectionState::Authenticated as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Begin teardown: mark closing and close the outbound queue so the
    /// writer task drains and exits. Idempotent.
    pub fn close(&self) {
        let current = self.state.load(Ordering::Acquire);
        if current < ConnectionState::Closing as u8 {
            let _ = self.state.compare_exchange(
                current,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        self.outbound.close();
    }

    pub fn set_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Record inbound activity (any frame or ws-level ping/pong).
    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Seconds since the last inbound activity.
    pub fn idle_seconds(&self) -> i64 {
        let last = self.last_activity.load(Ordering::Relaxed);
        (Utc::now().timestamp() - last).max(0)
    }

    pub fn subscribe(&self, kinds: &[EventKind]) {
        let mut filter = self.filter.write().unwrap_or_else(|e| e.into_inner());
        filter.subscribe(kinds);
    }

    pub fn unsubscribe(&self, kinds: &[EventKind]) {
        let mut filter = self.filter.write().unwrap_or_else(|e| e.into_inner());
        filter.unsubscribe(kinds);
    }

    pub fn accepts(&self, kind: EventKind) -> bool {
        let filter = self.filter.read().unwrap_or_else(|e| e.into_inner());
        filter.allows(kind)
    }

    /// Push a frame onto the outbound queue. Control frames bypass the
    /// subscription filter; callers check [`accepts`](Self::accepts) for
    /// event frames.
    pub fn enqueue(&self, frame: ServerFrame) -> PushOutcome {
        self.outbound.push(frame)
    }
}
