//! Canonical events published by upstream adapters and fanned out to clients.
//!
//! Every producer-specific payload is normalized into an [`Event`] carrying a
//! [`EventKind`], a UTC timestamp, the target session id, and a JSON payload.
//! The wire envelope for all frames is `{type, timestamp, session_id, data}`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deliverable event types. Subscription filters operate over this set;
/// control frames (`ping`, `pong`, `error`) are outside of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ChatStream,
    ToolProgress,
    CostUpdate,
    SystemStatus,
}

impl EventKind {
    /// All deliverable kinds, in a fixed order.
    pub const ALL: [EventKind; 4] = [
        EventKind::ChatStream,
        EventKind::ToolProgress,
        EventKind::CostUpdate,
        EventKind::SystemStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChatStream => "chat_stream",
            EventKind::ToolProgress => "tool_progress",
            EventKind::CostUpdate => "cost_update",
            EventKind::SystemStatus => "system_status",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical event, immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, session_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            session_id: session_id.into(),
            data,
        }
    }

    /// Build an event from a typed payload.
    pub fn from_payload<T: Serialize>(
        kind: EventKind,
        session_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(kind, session_id, serde_json::to_value(payload)?))
    }
}

/// One fragment of an LLM token stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamPayload {
    pub delta: String,
    pub token_count: u64,
    pub is_complete: bool,
}

/// Progress update for a running tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProgressPayload {
    pub tool_name: String,
    pub status: String,
    pub progress: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Budget period a cost figure is tracked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    #[default]
    Monthly,
    Weekly,
    Daily,
}

/// Cost tracking delta broadcast to every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostUpdatePayload {
    pub current_cost: f64,
    pub budget_remaining: f64,
    pub cost_breakdown: HashMap<String, f64>,
    pub period: BudgetPeriod,
}

/// Health classification for a single monitored producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Unreachable,
}

impl ServiceStatus {
    /// Severity rank; higher is worse.
    pub fn severity(&self) -> u8 {
        match self {
            ServiceStatus::Healthy => 0,
            ServiceStatus::Unhealthy => 1,
            ServiceStatus::Unreachable => 2,
        }
    }
}

/// Probe result for one monitored service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    pub last_check: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Error,
}

/// Alert raised for a non-healthy or slow service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub service: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated health snapshot broadcast as `system_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatusPayload {
    pub services: BTreeMap<String, ServiceHealth>,
    pub overall_status: ServiceStatus,
    pub alerts: Vec<Alert>,
}
