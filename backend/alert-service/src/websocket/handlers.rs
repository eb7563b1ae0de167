use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::state::AppState;
use crate::websocket::messages::{ClientMessage, ServerMessage};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub client_id: String,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, params.client_id, socket))
}

async fn handle_socket(state: AppState, client_id: String, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let epoch = state.manager.connect(client_id.clone(), tx).await;

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(%client_id, error = %e, "failed to serialize outbound envelope");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Channel closed: evicted by a reconnect or manager shutdown.
                None => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "server_shutdown".into(),
                        })))
                        .await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(&state, &client_id, &text).await;
                }
                Some(Ok(Message::Ping(_))) => {
                    // Pong is handled by the framework
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%client_id, error = %e, "websocket read error");
                    break;
                }
            }
        }
    }

    state.manager.disconnect_epoch(&client_id, epoch).await;
}

async fn handle_client_message(state: &AppState, client_id: &str, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(%client_id, error = %e, "unknown client action");
            let envelope = ServerMessage::error("unknown_action", format!("unrecognized message: {e}"));
            state.manager.send_envelope(client_id, envelope).await;
            return;
        }
    };

    match message {
        ClientMessage::Subscribe {
            alert_types,
            model_ids,
            severities,
            regulations,
        } => {
            state
                .manager
                .subscribe(client_id, &alert_types, &model_ids, &severities, &regulations)
                .await;
        }
        ClientMessage::Unsubscribe {
            alert_types,
            model_ids,
            severities,
            regulations,
        } => {
            state
                .manager
                .unsubscribe(client_id, &alert_types, &model_ids, &severities, &regulations)
                .await;
        }
        ClientMessage::Ping => {
            state.manager.touch_heartbeat(client_id).await;
            state
                .manager
                .send_envelope(client_id, ServerMessage::pong())
                .await;
        }
        ClientMessage::Status => {
            let active_connections = state.manager.active_connections_count().await;
            match state.manager.get_connection_info(client_id).await {
                Some(connection) => {
                    let envelope = ServerMessage::Status {
                        connection,
                        active_connections,
                    };
                    state.manager.send_envelope(client_id, envelope).await;
                }
                None => {
                    let envelope = ServerMessage::error("unknown_client", "connection not registered");
                    state.manager.send_envelope(client_id, envelope).await;
                }
            }
        }
        ClientMessage::History { limit } => {
            let alerts = state.manager.get_alert_history(limit, None, None).await;
            let count = alerts.len();
            state
                .manager
                .send_envelope(client_id, ServerMessage::History { alerts, count })
                .await;
        }
    }
}
