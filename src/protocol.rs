//! WebSocket subscription protocol
//!
//! ### Client → Server
//! ```json
//! {"type": "subscribe", "filter": {"table": "counter"}}
//! {"type": "subscribe", "filter": {"table": "position", "key": [1], "key_prefix": true}}
//! {"type": "unsubscribe", "subscription_id": "..."}
//! {"type": "ping"}
//! ```
//!
//! ### Server → Client
//! ```json
//! {"type": "subscribed", "subscription_id": "...", "filter": {...}}
//! {"type": "event", "subscription_id": "...", "seq": 3, "table": "counter", "kind": "delete", "key": [], "fields": null, "timestamp": "..."}
//! {"type": "unsubscribed", "subscription_id": "..."}
//! {"type": "error", "message": "..."}
//! {"type": "heartbeat", "timestamp": "..."}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::bus::{Delivery, FilterSpec, SubscriptionId};
use crate::projection::ChangeKind;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        filter: FilterSpec,
        /// Echoed back so clients can match replies to requests
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Unsubscribe {
        subscription_id: SubscriptionId,
    },
    Ping,
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        subscription_id: SubscriptionId,
        filter: FilterSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Event(Notification),
    Unsubscribed {
        subscription_id: SubscriptionId,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
}

/// One committed change as seen by a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub subscription_id: SubscriptionId,
    pub seq: u64,
    pub table: String,
    pub kind: ChangeKind,
    pub key: JsonValue,
    /// Field values after the change, `null` for deletes
    pub fields: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl From<&Delivery> for Notification {
    fn from(delivery: &Delivery) -> Self {
        let change = &delivery.change;
        Self {
            subscription_id: delivery.subscription_id,
            seq: change.seq,
            table: change.table.clone(),
            kind: change.kind,
            key: change.key_json(),
            fields: change.fields_json(),
            timestamp: change.timestamp,
        }
    }
}
