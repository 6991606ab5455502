//! The `/ws` participant endpoint.
//!
//! Upgrade flow: a single-use ticket in the query authenticates the
//! user, the connection registers with the hub, then a writer task
//! drains the hub queue while the read loop feeds the answer processor.
//!
//! Liveness: the server sends `server:heartbeat` on an interval; any
//! client message (including `user:heartbeat`) resets the idle timer.
//! Two silent intervals close the connection. A closed connection never
//! cascades into the running quiz.

use crate::answers::AnswerProcessor;
use crate::auth;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use quiz_protocol::{error_codes, ClientMessage, ErrorData, ServerHeartbeatData, ServerMessage};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Deserialize)]
pub struct WsQuery {
    ticket: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.ticket))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, ticket: String) {
    let Some(user_id) = auth::validate_ticket(&state.pool, &ticket).await else {
        let rejection = ServerMessage::Error(ErrorData {
            code: error_codes::INVALID_TICKET.to_owned(),
            message: "invalid, expired or already-used ticket".to_owned(),
            critical: true,
        });
        if let Ok(json) = serde_json::to_string(&rejection) {
            let _ = socket.send(Message::Text(json)).await;
        }
        return;
    };

    let (conn_id, mut outbound) = state.hub.register(user_id);
    info!(user_id, "participant connected");

    let (mut sink, mut stream) = socket.split();
    let heartbeat_interval = state.config.heartbeat_interval;

    // Writer: drains the hub queue and interleaves server heartbeats.
    // Ends when the hub closes the queue (unregister or slow-drop).
    let writer = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        loop {
            tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = heartbeat.tick() => {
                    let beat = ServerMessage::ServerHeartbeat(ServerHeartbeatData {
                        timestamp: Utc::now().timestamp_millis(),
                    });
                    let Ok(json) = serde_json::to_string(&beat) else { continue };
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    let processor = AnswerProcessor::new(
        state.pool.clone(),
        Arc::clone(&state.cache),
        Arc::clone(&state.events),
        state.active.clone(),
        Arc::clone(&state.config),
    );
    let idle_timeout = heartbeat_interval * 2;

    loop {
        match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                dispatch_client_message(&state, &processor, user_id, &text).await;
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                info!(user_id, "participant disconnected");
                break;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(err))) => {
                warn!(user_id, error = %err, "websocket read error");
                break;
            }
            Err(_) => {
                warn!(user_id, "idle timeout; closing connection");
                break;
            }
        }
    }

    state.hub.unregister(conn_id);
    writer.abort();
}

pub(crate) async fn dispatch_client_message(
    state: &AppState,
    processor: &AnswerProcessor,
    user_id: i64,
    text: &str,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::UserAnswer(data)) => {
            if let Err(err) = processor.process_answer(user_id, &data).await {
                send_error(state, user_id, err.code(), &err.to_string());
            }
        }
        Ok(ClientMessage::UserReady(data)) => {
            processor.process_ready(user_id, data.quiz_id);
        }
        // Receipt alone reset the idle timer.
        Ok(ClientMessage::UserHeartbeat(_)) => {}
        Err(err) => {
            warn!(user_id, error = %err, "unparseable client message");
            send_error(state, user_id, error_codes::PROTOCOL_ERROR, "invalid message");
        }
    }
}

fn send_error(state: &AppState, user_id: i64, code: &str, message: &str) {
    let event = ServerMessage::Error(ErrorData {
        code: code.to_owned(),
        message: message.to_owned(),
        critical: false,
    });
    if let Err(err) = state.events.send_to_user(user_id, &event) {
        warn!(user_id, error = %err, "failed to deliver error event");
    }
}
