use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::event::{Event, EventKind};

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        api_key: String,
        session_id: String,
    },
    Ping,
    Pong,
    Subscribe {
        #[serde(default)]
        types: Vec<EventKind>,
    },
    Unsubscribe {
        #[serde(default)]
        types: Vec<EventKind>,
    },
}

/// Frame type discriminant for server-to-client frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    ChatStream,
    ToolProgress,
    CostUpdate,
    SystemStatus,
    Ping,
    Pong,
    Error,
}

impl From<EventKind> for FrameType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::ChatStream => FrameType::ChatStream,
            EventKind::ToolProgress => FrameType::ToolProgress,
            EventKind::CostUpdate => FrameType::CostUpdate,
            EventKind::SystemStatus => FrameType::SystemStatus,
        }
    }
}

/// Server-to-client frame. All frames share the
/// `{type, timestamp, session_id, data}` envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub data: serde_json::Value,
}

impl ServerFrame {
    pub fn ping(session_id: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Ping,
            timestamp: Utc::now(),
            session_id: session_id.into(),
            data: json!({}),
        }
    }

    pub fn pong(session_id: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Pong,
            timestamp: Utc::now(),
            session_id: session_id.into(),
            data: json!({}),
        }
    }

    pub fn error(
        session_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            frame_type: FrameType::Error,
            timestamp: Utc::now(),
            session_id: session_id.into(),
            data: json!({
                "error_code": code.into(),
                "message": message.into(),
            }),
        }
    }
}

impl From<Event> for ServerFrame {
    fn from(event: Event) -> Self {
        Self {
            frame_type: event.kind.into(),
            // Keep the publish timestamp, not the delivery time.
            timestamp: event.timestamp,
            session_id: event.session_id,
            data: event.data,
        }
    }
}
