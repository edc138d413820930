use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::event::EventKind;
use crate::session::connection::ConnectionHandle;
use crate::session::outbound::PushOutcome;
use crate::websocket::ServerFrame;

/// One logical session: a set of live connections sharing a session id.
/// The backlog for offline delivery lives in the session queue, keyed by
/// the same id, so a session may outlive its last connection.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    last_activity: AtomicI64,
    inner: Mutex<SessionInner>,
}

#[derive(Debug, Default)]
struct SessionInner {
    connections: HashMap<Uuid, Arc<ConnectionHandle>>,
    /// Set by the sweeper when it removes the session from the registry;
    /// a concurrent `join` that grabbed the stale `Arc` retries.
    closed: bool,
}

impl Session {
    fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            inner: Mutex::new(SessionInner::default()),
        }
    }

    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn idle_seconds(&self) -> i64 {
        let last = self.last_activity.load(Ordering::Relaxed);
        (Utc::now().timestamp() - last).max(0)
    }

    pub fn connection_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .connections
            .len()
    }
}

/// Delivery report for one fan-out into a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct FanOutReport {
    /// Connections whose outbound queue accepted the frame.
    pub delivered: usize,
    /// Frames evicted from outbound queues to make room.
    pub evicted: usize,
}

/// Registry summary for the stats surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub active_sessions: usize,
    pub active_connections: usize,
}

/// Partitioned session registry. The map is sharded by session id; each
/// session's connection set sits behind its own lock, so operations on
/// different sessions never contend.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    max_connections_per_session: usize,
    outbound_capacity: usize,
}

impl SessionRegistry {
    pub fn new(max_connections_per_session: usize, outbound_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_connections_per_session,
            outbound_capacity,
        }
    }

    fn get_or_create(&self, session_id: &str) -> Arc<Session> {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Session::new(session_id)))
            .clone()
    }

    /// Add a connection to a session, creating the session if needed.
    /// The capacity check and the insert happen atomically under the
    /// session lock, so the cap can never be exceeded by racing joins.
    pub fn join(&self, session_id: &str) -> Result<Arc<ConnectionHandle>, GatewayError> {
        loop {
            let session = self.get_or_create(session_id);
            let mut inner = session.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.closed {
                // Sweeper removed this session between lookup and lock.
                drop(inner);
                continue;
            }
            if inner.connections.len() >= self.max_connections_per_session {
                return Err(GatewayError::Capacity {
                    session_id: session_id.to_string(),
                    limit: self.max_connections_per_session,
                });
            }
            let handle = Arc::new(ConnectionHandle::new(session_id, self.outbound_capacity));
            inner.connections.insert(handle.id, handle.clone());
            drop(inner);
            session.touch();
            return Ok(handle);
        }
    }

    /// Remove a connection from its session. Idempotent; the session
    /// itself (and any backlog) stays until the sweeper retires it.
    pub fn leave(&self, handle: &ConnectionHandle) {
        if let Some(session) = self.sessions.get(&handle.session_id) {
            let mut inner = session.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.connections.remove(&handle.id);
            drop(inner);
            session.touch();
        }
    }

    /// Mark a session live (creating it if needed) without joining.
    /// Used by the router so publishes keep backlog-only sessions alive.
    pub fn touch_session(&self, session_id: &str) {
        self.get_or_create(session_id).touch();
    }

    pub fn contains_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Push a frame to every authenticated connection of the session whose
    /// filter admits `kind`. Returns `None` when no connection accepted
    /// the frame (the caller then falls back to the session backlog); a
    /// connection whose outbound queue was already closed by teardown
    /// counts as ineligible, so the frame is never silently lost. The
    /// session lock is held across the pushes so concurrent publishes into
    /// the same session reach every connection in the same order.
    pub fn fan_out(
        &self,
        session_id: &str,
        kind: EventKind,
        frame: &ServerFrame,
    ) -> Option<FanOutReport> {
        let session = self.sessions.get(session_id)?.clone();
        let inner = session.inner.lock().unwrap_or_else(|e| e.into_inner());

        let mut report = FanOutReport::default();
        for conn in inner.connections.values() {
            if !conn.is_authenticated() || !conn.accepts(kind) {
                continue;
            }
            match conn.enqueue(frame.clone()) {
                PushOutcome::Queued => report.delivered += 1,
                PushOutcome::DroppedOldest => {
                    report.delivered += 1;
                    report.evicted += 1;
                }
                PushOutcome::Closed => {}
            }
        }
        drop(inner);

        if report.delivered > 0 {
            session.touch();
            Some(report)
        } else {
            None
        }
    }

    pub fn session_connections(&self, session_id: &str) -> Vec<Arc<ConnectionHandle>> {
        match self.sessions.get(session_id) {
            Some(session) => {
                let inner = session.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.connections.values().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// All authenticated connections across every session.
    pub fn authenticated_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        let mut result = Vec::new();
        for entry in self.sessions.iter() {
            let inner = entry.inner.lock().unwrap_or_else(|e| e.into_inner());
            result.extend(
                inner
                    .connections
                    .values()
                    .filter(|c| c.is_authenticated())
                    .cloned(),
            );
        }
        result
    }

    /// Connections without inbound activity for more than `timeout_secs`.
    pub fn stale_connections(&self, timeout_secs: i64) -> Vec<Arc<ConnectionHandle>> {
        let mut result = Vec::new();
        for entry in self.sessions.iter() {
            let inner = entry.inner.lock().unwrap_or_else(|e| e.into_inner());
            result.extend(
                inner
                    .connections
                    .values()
                    .filter(|c| c.idle_seconds() > timeout_secs)
                    .cloned(),
            );
        }
        result
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.sessions
            .iter()
            .map(|e| e.connection_count())
            .sum()
    }

    /// Retire sessions that are connection-free, idle past the TTL, and
    /// have no pending backlog (checked via `backlog_empty`). Returns the
    /// number of sessions removed.
    pub fn sweep_idle_sessions<F>(&self, idle_ttl_secs: i64, backlog_empty: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let before = self.sessions.len();
        self.sessions.retain(|id, session| {
            let mut inner = session.inner.lock().unwrap_or_else(|e| e.into_inner());
            let retire = inner.connections.is_empty()
                && session.idle_seconds() > idle_ttl_secs
                && backlog_empty(id);
            if retire {
                inner.closed = true;
            }
            !retire
        });
        before - self.sessions.len()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_sessions: self.session_count(),
            active_connections: self.connection_count(),
        }
    }
}
