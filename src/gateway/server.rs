//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time;

use crate::error::GatewayError;
use crate::AppState;

use super::events::{
    ActionName, ClientMessage, DeleteMessagePayload, EditMessagePayload, EventName,
    GatewayMessage, HeartbeatPayload, IdentifyPayload, ReactPayload, RoomActionPayload,
    SendMessagePayload, OP_DISPATCH, OP_HEARTBEAT, OP_IDENTIFY,
};
use super::fanout::{BroadcastPayload, BroadcastScope};
use super::handler::{handle_identify, HEARTBEAT_INTERVAL_MS};
use super::session::GatewaySession;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Timeout for receiving IDENTIFY after connection (seconds).
const IDENTIFY_TIMEOUT_SECS: u64 = 10;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: Wait for IDENTIFY within the handshake timeout.
    let identify_result = time::timeout(Duration::from_secs(IDENTIFY_TIMEOUT_SECS), async {
        while let Some(msg) = ws_rx.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(?e, "ws read error during identify");
                    return Err("read error");
                }
            };

            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => return Err("client closed"),
                Message::Ping(_) | Message::Pong(_) => continue,
                _ => continue,
            };

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(_) => {
                    let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                    return Err("invalid json");
                }
            };

            if client_msg.op == OP_IDENTIFY {
                let payload: IdentifyPayload = serde_json::from_value(client_msg.d)
                    .map_err(|_| "invalid identify payload")?;
                return Ok(payload);
            }

            let _ = send_close(&mut ws_tx, CLOSE_NOT_AUTHENTICATED, "Expected IDENTIFY").await;
            return Err("expected identify");
        }
        Err("connection closed before identify")
    })
    .await;

    let identify_payload = match identify_result {
        Ok(Ok(payload)) => payload,
        Ok(Err(reason)) => {
            tracing::debug!(%reason, "initial handshake failed");
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, reason).await;
            return;
        }
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    let (session, ready_msg) = match handle_identify(&state, identify_payload).await {
        Ok(result) => result,
        Err(reason) => {
            tracing::debug!(%reason, "identify handler failed");
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, reason).await;
            return;
        }
    };
    let session = Arc::new(session);

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        rooms = session.subscribed_rooms().len(),
        "gateway session established"
    );

    // Announce the identity coming online to its rooms.
    if let Some(update) = state
        .presence
        .connected(&session.user_id, &session.connection_id)
        .await
    {
        announce_presence(&state, &session, &update);
    }

    // Subscribe before READY goes out so no event dispatched after the
    // handshake can be missed.
    let broadcast_rx = state.broadcast.subscribe();

    let ready_json = serde_json::to_string(&ready_msg).unwrap_or_default();
    if ws_tx.send(Message::Text(ready_json.into())).await.is_err() {
        teardown(&state, &session).await;
        return;
    }
    run_session(state.clone(), session.clone(), &mut ws_tx, ws_rx, broadcast_rx).await;

    teardown(&state, &session).await;

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        "gateway session ended"
    );
}

/// Registry cleanup after a connection goes away: presence transition and
/// typing-mark drain. Nothing here rolls back committed mutations.
async fn teardown(state: &AppState, session: &Arc<GatewaySession>) {
    if let Some(update) = state
        .presence
        .disconnected(&session.user_id, &session.connection_id)
        .await
    {
        announce_presence(state, session, &update);

        // The identity has no live connection left; drain its typing marks
        // immediately rather than waiting out the sweep timeout.
        for room_id in state.typing.remove_user(&session.user_id) {
            state.broadcast.dispatch(BroadcastPayload::room(
                &room_id,
                EventName::USER_STOPPED_TYPING,
                serde_json::json!({
                    "user_id": session.user_id,
                    "room_id": room_id,
                }),
            ));
        }
    }
}

fn announce_presence(
    state: &AppState,
    session: &Arc<GatewaySession>,
    update: &super::presence::PresenceUpdate,
) {
    let data = serde_json::to_value(update).unwrap_or_default();
    for room_id in session.subscribed_rooms() {
        state
            .broadcast
            .dispatch(BroadcastPayload::room(&room_id, EventName::PRESENCE_UPDATE, data.clone()));
    }
}

/// Main session event loop: read client actions, forward broadcasts,
/// enforce heartbeat.
async fn run_session(
    state: AppState,
    session: Arc<GatewaySession>,
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
    mut broadcast_rx: broadcast::Receiver<Arc<BroadcastPayload>>,
) {
    // Heartbeat deadline: client must heartbeat within 1.5× the interval.
    let heartbeat_deadline = Duration::from_millis(HEARTBEAT_INTERVAL_MS * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = send_close(ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };

                        match client_msg.op {
                            OP_HEARTBEAT => {
                                got_heartbeat = true;
                                let payload: HeartbeatPayload =
                                    serde_json::from_value(client_msg.d).unwrap_or(HeartbeatPayload { seq: 0 });
                                let ack = GatewayMessage::heartbeat_ack(payload.seq);
                                if send_message(ws_tx, &ack).await.is_err() {
                                    break;
                                }
                            }
                            OP_DISPATCH => {
                                let Some(action) = client_msg.t.as_deref() else {
                                    let _ = send_close(ws_tx, CLOSE_UNKNOWN_ERROR, "Missing action name").await;
                                    break;
                                };
                                if let Err(err) = handle_action(&state, &session, action, client_msg.d).await {
                                    // Errors go to the originating connection
                                    // only; the session stays open.
                                    let text = error_text(&err);
                                    let msg = GatewayMessage::error(session.next_seq(), &text);
                                    if send_message(ws_tx, &msg).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            OP_IDENTIFY => {
                                let _ = send_close(ws_tx, CLOSE_UNKNOWN_ERROR, "Already identified").await;
                                break;
                            }
                            _ => {
                                let _ = send_close(ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Broadcast event from the router.
            result = broadcast_rx.recv() => {
                match result {
                    Ok(payload) => {
                        apply_membership_control(&state, &session, &payload).await;

                        if !payload.targets(&session) {
                            continue;
                        }

                        let seq = session.next_seq();
                        let msg = GatewayMessage::dispatch(&payload.event_name, seq, payload.data.clone());
                        if send_message(ws_tx, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            connection_id = %session.connection_id,
                            skipped = n,
                            "gateway session lagged behind broadcast"
                        );
                        // Continue — the client reconciles over REST.
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }

            // Heartbeat timeout check.
            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        connection_id = %session.connection_id,
                        "heartbeat timeout — closing connection"
                    );
                    let _ = send_close(ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

/// Membership control events carried on the identity scope: every live
/// connection of the identity adjusts its subscription set, so a join made
/// over REST or on another device takes effect on all of them.
async fn apply_membership_control(
    state: &AppState,
    session: &Arc<GatewaySession>,
    payload: &BroadcastPayload,
) {
    let BroadcastScope::User(user_id) = &payload.scope else {
        return;
    };
    if *user_id != session.user_id {
        return;
    }
    let Some(room_id) = payload.data.get("room_id").and_then(Value::as_str) else {
        return;
    };

    match payload.event_name.as_str() {
        n if n == EventName::ROOM_JOINED => {
            // Membership is re-verified against the store at subscribe time.
            if let Err(err) = state.rooms.subscribe(session, room_id).await {
                tracing::warn!(
                    connection_id = %session.connection_id,
                    %room_id,
                    %err,
                    "room-joined subscribe failed"
                );
            }
        }
        n if n == EventName::ROOM_LEFT => {
            state.rooms.unsubscribe(session, room_id);
        }
        _ => {}
    }
}

/// Dispatch one client action. Errors are reported to the originator only.
async fn handle_action(
    state: &AppState,
    session: &Arc<GatewaySession>,
    action: &str,
    data: Value,
) -> Result<(), GatewayError> {
    match action {
        n if n == ActionName::JOIN_ROOM => {
            let payload: RoomActionPayload = parse(data)?;
            let room = state.rooms.subscribe(session, &payload.room_id).await?;
            tracing::debug!(
                connection_id = %session.connection_id,
                room_id = %room.id,
                "joined room channel"
            );
            Ok(())
        }
        n if n == ActionName::LEAVE_ROOM => {
            let payload: RoomActionPayload = parse(data)?;
            state.rooms.unsubscribe(session, &payload.room_id);
            Ok(())
        }
        n if n == ActionName::SEND_MESSAGE => {
            let payload: SendMessagePayload = parse(data)?;
            state.messages.submit(&session.user_id, payload).await?;
            Ok(())
        }
        n if n == ActionName::TYPING_START => {
            let payload: RoomActionPayload = parse(data)?;
            if !session.is_subscribed(&payload.room_id) {
                return Err(GatewayError::AccessDenied);
            }
            // A refresh of an already-active mark is a broadcast no-op.
            if state.typing.start(&session.user_id, &payload.room_id) {
                state.broadcast.dispatch(BroadcastPayload::room_except(
                    &payload.room_id,
                    &session.connection_id,
                    EventName::USER_TYPING,
                    serde_json::json!({
                        "user_id": session.user_id,
                        "name": session.name,
                        "room_id": payload.room_id,
                    }),
                ));
            }
            Ok(())
        }
        n if n == ActionName::TYPING_STOP => {
            let payload: RoomActionPayload = parse(data)?;
            if state.typing.stop(&session.user_id, &payload.room_id) {
                state.broadcast.dispatch(BroadcastPayload::room_except(
                    &payload.room_id,
                    &session.connection_id,
                    EventName::USER_STOPPED_TYPING,
                    serde_json::json!({
                        "user_id": session.user_id,
                        "room_id": payload.room_id,
                    }),
                ));
            }
            Ok(())
        }
        n if n == ActionName::REACT_TO_MESSAGE => {
            let payload: ReactPayload = parse(data)?;
            state
                .messages
                .react(&session.user_id, &payload.message_id, &payload.emoji)
                .await?;
            Ok(())
        }
        n if n == ActionName::EDIT_MESSAGE => {
            let payload: EditMessagePayload = parse(data)?;
            state
                .messages
                .edit(&session.user_id, &payload.message_id, &payload.content)
                .await?;
            Ok(())
        }
        n if n == ActionName::DELETE_MESSAGE => {
            let payload: DeleteMessagePayload = parse(data)?;
            state
                .messages
                .delete(&session.user_id, &payload.message_id)
                .await?;
            Ok(())
        }
        _ => Err(GatewayError::Validation("Unknown action".to_string())),
    }
}

fn parse<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, GatewayError> {
    serde_json::from_value(data)
        .map_err(|_| GatewayError::Validation("Invalid action payload".to_string()))
}

/// Client-facing text for an action error. Internal failures are logged and
/// reported generically.
fn error_text(err: &GatewayError) -> String {
    match err {
        GatewayError::AccessDenied
        | GatewayError::NotFound(_)
        | GatewayError::Validation(_) => err.to_string(),
        GatewayError::Persistence(detail) | GatewayError::Transport(detail) => {
            tracing::error!(%detail, "action failed");
            "Failed to process request".to_string()
        }
    }
}

async fn send_message(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    msg: &GatewayMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).unwrap_or_default();
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
