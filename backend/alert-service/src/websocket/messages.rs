//! Wire message types for the dashboard WebSocket protocol.
use serde::{Deserialize, Serialize};

use crate::models::{Alert, AlertSeverity, AlertType};

fn default_history_limit() -> usize {
    50
}

/// Client -> server messages, dispatched on the `action` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        alert_types: Vec<AlertType>,
        #[serde(default)]
        model_ids: Vec<String>,
        #[serde(default)]
        severities: Vec<AlertSeverity>,
        #[serde(default)]
        regulations: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        alert_types: Vec<AlertType>,
        #[serde(default)]
        model_ids: Vec<String>,
        #[serde(default)]
        severities: Vec<AlertSeverity>,
        #[serde(default)]
        regulations: Vec<String>,
    },
    Ping,
    Status,
    History {
        #[serde(default = "default_history_limit")]
        limit: usize,
    },
}

/// Per-axis subscription snapshot echoed back to clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionSnapshot {
    pub alert_types: Vec<String>,
    pub model_ids: Vec<String>,
    pub severities: Vec<String>,
    pub regulations: Vec<String>,
}

/// Connection state snapshot served by the `status` action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionInfo {
    pub client_id: String,
    pub connected_at: i64,
    pub last_heartbeat: i64,
    pub received_count: u64,
    pub active: bool,
    pub subscriptions: SubscriptionSnapshot,
}

/// Server -> client envelopes, tagged on the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        client_id: String,
        heartbeat_interval_secs: u64,
        timestamp: i64,
    },
    SubscriptionUpdated {
        subscriptions: SubscriptionSnapshot,
    },
    Alert {
        alert: Alert,
    },
    Heartbeat {
        timestamp: i64,
        active_connections: usize,
    },
    Pong {
        timestamp: i64,
    },
    Status {
        connection: ConnectionInfo,
        active_connections: usize,
    },
    History {
        alerts: Vec<Alert>,
        count: usize,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn connection_established(client_id: String, heartbeat_interval_secs: u64) -> Self {
        ServerMessage::ConnectionEstablished {
            client_id,
            heartbeat_interval_secs,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn alert(alert: Alert) -> Self {
        ServerMessage::Alert { alert }
    }

    pub fn heartbeat(active_connections: usize) -> Self {
        ServerMessage::Heartbeat {
            timestamp: chrono::Utc::now().timestamp(),
            active_connections,
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
