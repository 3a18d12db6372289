//! WebSocket upgrade handler and per-connection event loop.
//!
//! Authentication happens once, before the upgrade completes; afterwards
//! every inbound event is authorized per room-scoped action and either fans
//! out through the broadcast hub or goes to the call coordinator.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::auth::tokens;
use crate::error::ApiError;
use crate::AppState;

use super::call::CallCommand;
use super::events::{ClientEvent, EventName, ServerEvent};
use super::fanout::{Outbound, Recipient};
use super::session::ConnSession;

/// Close code sent to a connection evicted by a newer login.
const CLOSE_EVICTED: u16 = 4008;

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Response {
    let token = params.token.or_else(|| {
        headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(tokens::token_from_cookie)
            .map(str::to_string)
    });

    let Some(token) = token else {
        tracing::debug!("gateway connect without token");
        return ApiError::unauthorized("Missing connection token").into_response();
    };

    let identity = match tokens::verify(&token, &state.config.jwt_secret) {
        Ok(identity) => identity,
        Err(err) => {
            tracing::debug!(%err, "gateway token rejected");
            return ApiError::unauthorized("Invalid or expired token").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, identity))
}

async fn handle_connection(socket: WebSocket, state: AppState, identity: tokens::Identity) {
    let conn_id = state.presence.allocate_conn_id();
    let mut session = ConnSession::new(conn_id, identity);
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Subscribe before touching presence so this connection observes its
    // own online broadcast and everything after it.
    let mut broadcast_rx = state.broadcast.subscribe();

    tracing::info!(
        user_id = %session.identity.user_id,
        username = %session.identity.username,
        conn_id,
        "gateway connection established"
    );

    if let Some(evicted) = state
        .presence
        .mark_online(&session.identity.user_id, conn_id)
    {
        tracing::debug!(
            user_id = %session.identity.user_id,
            evicted_conn = evicted,
            "prior connection evicted by reconnect"
        );
        state
            .broadcast
            .to_connection(evicted, EventName::SESSION_EVICTED, Value::Null);
    }
    state
        .broadcast
        .to_all(EventName::USER_ONLINE, json!(session.identity.user_id));
    state
        .broadcast
        .to_monitors(EventName::ADMIN_ONLINE_COUNT, json!(state.presence.count()));

    // Operators get the current state pushed directly on join. Best-effort:
    // a dead socket surfaces as a read error in the loop right after.
    if session.identity.is_operator {
        if let Some(call) = state.calls.snapshot().await {
            let event = ServerEvent::new(
                EventName::CALL_STARTED,
                serde_json::to_value(&call).unwrap_or_default(),
            );
            let _ = send_event(&mut ws_tx, &event).await;
        }
        let count = ServerEvent::new(EventName::ADMIN_ONLINE_COUNT, json!(state.presence.count()));
        let _ = send_event(&mut ws_tx, &count).await;
    }

    run_session(&mut session, &state, &mut ws_tx, &mut ws_rx, &mut broadcast_rx).await;

    // Disconnect reconciliation. Skipped when this connection was evicted:
    // the presence entry (and any call) belongs to the successor.
    if state
        .presence
        .mark_offline(&session.identity.user_id, conn_id)
    {
        state
            .broadcast
            .to_all(EventName::USER_OFFLINE, json!(session.identity.user_id));
        state
            .broadcast
            .to_monitors(EventName::ADMIN_ONLINE_COUNT, json!(state.presence.count()));
        state
            .calls
            .send(CallCommand::Disconnected {
                user_id: session.identity.user_id.clone(),
            })
            .await;
    }

    tracing::info!(
        user_id = %session.identity.user_id,
        conn_id,
        "gateway connection closed"
    );
}

/// Main loop: read client events, forward matching broadcasts.
async fn run_session(
    session: &mut ConnSession,
    state: &AppState,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
    broadcast_rx: &mut broadcast::Receiver<Arc<Outbound>>,
) {
    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let event: ClientEvent = match serde_json::from_str(&text) {
                            Ok(event) => event,
                            Err(err) => {
                                tracing::debug!(%err, conn_id = session.conn_id, "dropping unparseable client event");
                                continue;
                            }
                        };
                        handle_event(session, state, event).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(?err, conn_id = session.conn_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            result = broadcast_rx.recv() => {
                match result {
                    Ok(outbound) => {
                        if !session.should_receive(&outbound.recipient) {
                            continue;
                        }

                        let evicting = outbound.event == EventName::SESSION_EVICTED
                            && matches!(outbound.recipient, Recipient::Connection(_));

                        let event = ServerEvent::new(outbound.event, outbound.data.clone());
                        if send_event(ws_tx, &event).await.is_err() {
                            break;
                        }

                        if evicting {
                            let _ = ws_tx
                                .send(Message::Close(Some(CloseFrame {
                                    code: CLOSE_EVICTED,
                                    reason: "Evicted by newer login".into(),
                                })))
                                .await;
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            conn_id = session.conn_id,
                            skipped,
                            "gateway connection lagged behind broadcast"
                        );
                        // Continue — the missed events are simply dropped.
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Dispatch one client event. Room-scoped actions are re-authorized against
/// the directory on every use; denied joins get an explicit error, denied
/// best-effort signals are dropped silently.
async fn handle_event(session: &mut ConnSession, state: &AppState, event: ClientEvent) {
    match event {
        ClientEvent::RoomJoin(room_id) => {
            if is_member(state, &session.identity.user_id, &room_id).await {
                session.join_room(&room_id);
            } else {
                state.broadcast.to_connection(
                    session.conn_id,
                    EventName::ERROR,
                    json!(format!("Not a member of room {room_id}")),
                );
            }
        }
        ClientEvent::RoomLeave(room_id) => {
            session.leave_room(&room_id);
        }
        ClientEvent::MessageSend(mut data) => {
            let Some(room_id) = data.get("roomId").and_then(Value::as_str).map(str::to_string)
            else {
                return;
            };
            if !is_member(state, &session.identity.user_id, &room_id).await {
                return;
            }
            if let Value::Object(map) = &mut data {
                // Server-assigned; inbound values for these are never trusted.
                map.insert("userId".to_string(), json!(session.identity.user_id));
                map.insert("username".to_string(), json!(session.identity.username));
                map.insert("createdAt".to_string(), json!(chrono::Utc::now()));
            }
            state
                .broadcast
                .to_room(&room_id, EventName::MESSAGE_NEW, data);
        }
        ClientEvent::MessageTyping(room_id) => {
            if session.in_room(&room_id)
                && is_member(state, &session.identity.user_id, &room_id).await
            {
                state.broadcast.to_room_except(
                    &room_id,
                    session.conn_id,
                    EventName::MESSAGE_TYPING,
                    json!(session.identity.username),
                );
            }
        }
        ClientEvent::MessageRead { message_id, room_id } => {
            if session.in_room(&room_id)
                && is_member(state, &session.identity.user_id, &room_id).await
            {
                state.broadcast.to_room(
                    &room_id,
                    EventName::MESSAGE_READ,
                    json!({ "messageId": message_id, "userId": session.identity.user_id }),
                );
            }
        }
        ClientEvent::CallInitiate { callee_id } => {
            state
                .calls
                .send(CallCommand::Initiate {
                    identity: session.identity.clone(),
                    callee_id,
                })
                .await;
        }
        ClientEvent::CallAccept { log_id } => {
            state
                .calls
                .send(CallCommand::Accept {
                    identity: session.identity.clone(),
                    log_id,
                })
                .await;
        }
        ClientEvent::CallEnd { log_id } => {
            state
                .calls
                .send(CallCommand::End {
                    identity: session.identity.clone(),
                    log_id,
                })
                .await;
        }
        ClientEvent::CallReject { log_id } => {
            state
                .calls
                .send(CallCommand::Reject {
                    identity: session.identity.clone(),
                    log_id,
                })
                .await;
        }
        ClientEvent::CallTerminate { log_id } => {
            state
                .calls
                .send(CallCommand::Terminate {
                    identity: session.identity.clone(),
                    log_id,
                })
                .await;
        }
        ClientEvent::CallSignal {
            target_user_id,
            signal,
        } => {
            state
                .calls
                .send(CallCommand::Signal {
                    identity: session.identity.clone(),
                    target_user_id,
                    signal,
                })
                .await;
        }
    }
}

/// Membership lookup with deny-on-failure.
async fn is_member(state: &AppState, user_id: &str, room_id: &str) -> bool {
    match state.store.is_member(user_id, room_id).await {
        Ok(member) => member,
        Err(err) => {
            tracing::warn!(%err, user_id, room_id, "membership lookup failed; denying");
            false
        }
    }
}

async fn send_event(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}
