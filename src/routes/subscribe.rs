//! WebSocket subscription endpoint
//!
//! ## Protocol
//!
//! ### Client → Server
//! ```json
//! {"type": "subscribe", "filter": {"table": "position", "key": ["0x01.."]}}
//! {"type": "unsubscribe", "subscription_id": "..."}
//! {"type": "ping"}
//! ```
//!
//! ### Server → Client
//! ```json
//! {"type": "subscribed", "subscription_id": "...", "filter": {...}}
//! {"type": "event", "subscription_id": "...", "seq": 7, "table": "...", ...}
//! {"type": "unsubscribed", "subscription_id": "..."}
//! {"type": "error", "message": "..."}
//! {"type": "heartbeat", "timestamp": "..."}
//! ```
//!
//! One socket holds one bus connection and any number of subscriptions on
//! it. If the bus drops the connection for falling behind, the socket gets
//! an error frame and is closed; the client reconnects and resubscribes.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use crate::bus::{BusConnection, NotificationBus};
use crate::protocol::{ClientMessage, Notification, ServerMessage};
use crate::server::AppState;
use crate::types::TableflowError;

type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Handle WebSocket upgrade for /subscribe
pub fn handle_subscribe_upgrade(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    match hyper_tungstenite::upgrade(req, None) {
        Ok((response, websocket)) => {
            let bus = Arc::clone(&state.ctx.bus);
            let heartbeat = state.args.heartbeat_interval();
            let shutdown_rx = state.shutdown_receiver();

            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => {
                        if let Err(e) = run_socket(ws, bus, heartbeat, shutdown_rx).await {
                            warn!(error = %e, "Subscription socket error");
                        }
                    }
                    Err(e) => {
                        error!("WebSocket upgrade failed: {:?}", e);
                    }
                }
            });

            let (parts, _) = response.into_parts();
            Response::from_parts(parts, Full::new(Bytes::new()))
        }
        Err(e) => {
            error!("WebSocket upgrade error: {:?}", e);
            Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Full::new(Bytes::from(format!("WebSocket upgrade failed: {e}"))))
                .unwrap()
        }
    }
}

/// Apply one client frame to the connection and build the reply
pub fn handle_client_message(conn: &BusConnection, text: &str) -> ServerMessage {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            return ServerMessage::Error {
                message: format!("Invalid message: {}", e),
                request_id: None,
            }
        }
    };

    match message {
        ClientMessage::Subscribe { filter, request_id } => match conn.subscribe_spec(&filter) {
            Ok(subscription_id) => {
                debug!(connection = %conn.id(), subscription = %subscription_id, "Subscribed");
                ServerMessage::Subscribed {
                    subscription_id,
                    filter,
                    request_id,
                }
            }
            Err(e) => ServerMessage::Error {
                message: e.to_string(),
                request_id,
            },
        },
        ClientMessage::Unsubscribe { subscription_id } => {
            if conn.unsubscribe(subscription_id) {
                ServerMessage::Unsubscribed { subscription_id }
            } else {
                ServerMessage::Error {
                    message: format!("Unknown subscription: {}", subscription_id),
                    request_id: None,
                }
            }
        }
        ClientMessage::Ping => ServerMessage::Heartbeat {
            timestamp: chrono::Utc::now(),
        },
    }
}

async fn send<S>(sink: &mut S, message: &ServerMessage) -> Result<(), TableflowError>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(message).map_err(|e| TableflowError::Internal(e.to_string()))?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Serve an established subscription socket until either side goes away
async fn run_socket(
    ws: HyperWebSocket,
    bus: Arc<NotificationBus>,
    heartbeat_interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), TableflowError> {
    let (mut ws_sink, mut ws_stream) = ws.split();
    let mut conn = bus.connect();

    let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
    // first tick fires immediately
    heartbeat_timer.tick().await;

    info!(connection = %conn.id(), "Subscription socket established");

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_message(&conn, &text);
                        send(&mut ws_sink, &reply).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %conn.id(), "Client closed socket");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error");
                        break;
                    }
                    None => break,
                }
            }

            delivery = conn.recv() => {
                match delivery {
                    Some(delivery) => {
                        let event = ServerMessage::Event(Notification::from(&delivery));
                        if let Err(e) = send(&mut ws_sink, &event).await {
                            warn!(error = %e, "Failed to send event to client");
                            break;
                        }
                    }
                    None => {
                        // the bus dropped this connection after its queue overflowed
                        warn!(connection = %conn.id(), "Subscriber fell behind, closing socket");
                        let notice = ServerMessage::Error {
                            message: "Subscriber queue overflowed; reconnect and resubscribe".into(),
                            request_id: None,
                        };
                        let _ = send(&mut ws_sink, &notice).await;
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            _ = heartbeat_timer.tick() => {
                let heartbeat = ServerMessage::Heartbeat { timestamp: chrono::Utc::now() };
                if let Err(e) = send(&mut ws_sink, &heartbeat).await {
                    warn!(error = %e, "Failed to send heartbeat");
                    break;
                }
            }

            _ = shutdown_rx.recv() => {
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    info!(connection = %conn.id(), "Subscription socket closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::codec::TypeTag;
    use crate::metrics::Metrics;
    use crate::schema::{FieldDescriptor, SchemaRegistry, TableDescriptor};

    fn bus() -> Arc<NotificationBus> {
        let registry = Arc::new(SchemaRegistry::new());
        registry
            .register(
                TableDescriptor::new("counter", vec![FieldDescriptor::value("value", TypeTag::U32)])
                    .unwrap(),
            )
            .unwrap();
        Arc::new(NotificationBus::new(
            registry,
            Arc::new(Metrics::new()),
            BusConfig::default(),
        ))
    }

    #[test]
    fn test_subscribe_then_unsubscribe() {
        let bus = bus();
        let conn = bus.connect();

        let reply = handle_client_message(
            &conn,
            r#"{"type":"subscribe","filter":{"table":"counter"},"request_id":"r1"}"#,
        );
        let id = match reply {
            ServerMessage::Subscribed {
                subscription_id,
                request_id,
                ..
            } => {
                assert_eq!(request_id.as_deref(), Some("r1"));
                subscription_id
            }
            other => panic!("Expected Subscribed, got {:?}", other),
        };
        assert_eq!(bus.subscription_count(), 1);

        let text = format!(r#"{{"type":"unsubscribe","subscription_id":"{}"}}"#, id);
        assert_eq!(
            handle_client_message(&conn, &text),
            ServerMessage::Unsubscribed { subscription_id: id }
        );
        assert_eq!(bus.subscription_count(), 0);

        assert!(matches!(
            handle_client_message(&conn, &text),
            ServerMessage::Error { .. }
        ));
    }

    #[test]
    fn test_rejections_are_error_frames() {
        let bus = bus();
        let conn = bus.connect();

        match handle_client_message(&conn, r#"{"type":"subscribe","filter":{"table":"missing"}}"#) {
            ServerMessage::Error { message, .. } => assert!(message.contains("missing")),
            other => panic!("Expected Error, got {:?}", other),
        }
        assert!(matches!(
            handle_client_message(&conn, "{not json"),
            ServerMessage::Error { .. }
        ));
        assert!(matches!(
            handle_client_message(&conn, r#"{"type":"ping"}"#),
            ServerMessage::Heartbeat { .. }
        ));
    }
}
