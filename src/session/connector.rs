//! Transports a session can subscribe through

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use futures_util::SinkExt;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::bus::{FilterSpec, NotificationBus};
use crate::protocol::{ClientMessage, Notification, ServerMessage};
use crate::types::{BusError, SessionError};

/// Stream of notifications for one subscription; ends on transport loss
pub type NotificationStream = BoxStream<'static, Result<Notification, SessionError>>;

/// Opens one subscription over a fresh transport
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect, issue `filter`, and return the notification stream once the
    /// subscription is acknowledged
    async fn open(&self, filter: &FilterSpec) -> Result<NotificationStream, SessionError>;
}

/// In-process transport straight onto the bus
pub struct LocalConnector {
    bus: Arc<NotificationBus>,
}

impl LocalConnector {
    pub fn new(bus: Arc<NotificationBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn open(&self, filter: &FilterSpec) -> Result<NotificationStream, SessionError> {
        let connection = self.bus.connect();
        connection.subscribe_spec(filter).map_err(|e| match e {
            BusError::ConnectionClosed => SessionError::Connect(e.to_string()),
            other => SessionError::Rejected(other.to_string()),
        })?;
        let stream = stream::unfold(connection, |mut connection| async move {
            let delivery = connection.recv().await?;
            Some((Ok(Notification::from(&delivery)), connection))
        });
        Ok(stream.boxed())
    }
}

/// WebSocket transport to a remote `/subscribe` endpoint
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// `url` is the full `ws://host:port/subscribe` address
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, filter: &FilterSpec) -> Result<NotificationStream, SessionError> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let request = ClientMessage::Subscribe {
            filter: filter.clone(),
            request_id: None,
        };
        let json = serde_json::to_string(&request).map_err(|e| SessionError::Protocol(e.to_string()))?;
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        // wait for the acknowledgement, skipping heartbeats
        let subscription_id = loop {
            let frame = read
                .next()
                .await
                .ok_or_else(|| SessionError::Connect("connection closed before subscribe ack".into()))?
                .map_err(|e| SessionError::Connect(e.to_string()))?;
            let Message::Text(text) = frame else {
                continue;
            };
            match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::Subscribed { subscription_id, .. }) => break subscription_id,
                Ok(ServerMessage::Error { message, .. }) => return Err(SessionError::Rejected(message)),
                Ok(_) => continue,
                Err(e) => return Err(SessionError::Protocol(e.to_string())),
            }
        };
        debug!(url = %self.url, subscription = %subscription_id, "Remote subscription acknowledged");

        // the write half rides along so the socket stays open while the stream lives
        let stream = stream::unfold((read, write), |(mut read, write)| async move {
            loop {
                let item = match read.next().await? {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::Event(n)) => Ok(n),
                        Ok(_) => continue,
                        Err(e) => Err(SessionError::Protocol(e.to_string())),
                    },
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => continue,
                    Err(e) => Err(SessionError::Connect(e.to_string())),
                };
                return Some((item, (read, write)));
            }
        });
        Ok(stream.boxed())
    }
}
