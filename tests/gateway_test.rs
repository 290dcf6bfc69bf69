mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parley_api::store::ChatStore;
use tokio::time;
use tokio_tungstenite::tungstenite;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper: start an actual TCP server for WebSocket testing.
/// Returns (addr, state). The server runs in the background.
async fn start_ws_server() -> (SocketAddr, parley_api::AppState) {
    let state = common::test_state();
    parley_api::gateway::spawn_typing_sweeper(state.clone());
    let app = parley_api::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Helper: connect to the gateway WebSocket and send IDENTIFY.
/// Returns the stream after asserting the READY dispatch.
async fn connect_and_identify(addr: SocketAddr, token: &str) -> WsStream {
    let url = format!("ws://{addr}/gateway");
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let (mut write, mut read) = ws_stream.split();

    let identify = serde_json::json!({
        "op": 2,
        "d": { "token": token }
    });
    write
        .send(tungstenite::Message::Text(identify.to_string().into()))
        .await
        .expect("send identify");

    let msg = time::timeout(Duration::from_secs(5), read.next())
        .await
        .expect("timeout waiting for ready")
        .expect("stream ended")
        .expect("ws read error");

    let text = msg.into_text().expect("not text");
    let ready: serde_json::Value = serde_json::from_str(&text).expect("parse ready");
    assert_eq!(ready["op"], 0, "ready should be op=0 (DISPATCH)");
    assert_eq!(ready["t"], "ready");
    assert!(ready["s"].as_u64().unwrap() > 0);
    assert!(ready["d"]["connection_id"].as_str().is_some());
    assert!(ready["d"]["heartbeat_interval"].as_u64().is_some());

    read.reunite(write).expect("reunite")
}

/// Helper: read dispatch frames until one with event name `t` arrives,
/// skipping unrelated events (presence updates race with test setup).
async fn next_event(ws: &mut WsStream, t: &str) -> serde_json::Value {
    let deadline = Duration::from_secs(5);
    loop {
        let msg = time::timeout(deadline, ws.next())
            .await
            .unwrap_or_else(|_| panic!("timeout waiting for {t}"))
            .expect("stream ended")
            .expect("ws read error");
        let text = match msg {
            tungstenite::Message::Text(text) => text,
            _ => continue,
        };
        let frame: serde_json::Value = serde_json::from_str(&text).expect("parse frame");
        if frame["op"] == 0 && frame["t"] == t {
            return frame["d"].clone();
        }
    }
}

/// Helper: assert no dispatch frame arrives within the window.
async fn assert_silent(ws: &mut WsStream, window: Duration) {
    if let Ok(Some(Ok(msg))) = time::timeout(window, ws.next()).await {
        panic!("expected silence, got: {msg:?}");
    }
}

/// Helper: send a client action (op=0) frame.
async fn send_action(ws: &mut WsStream, action: &str, data: serde_json::Value) {
    let frame = serde_json::json!({ "op": 0, "t": action, "d": data });
    ws.send(tungstenite::Message::Text(frame.to_string().into()))
        .await
        .expect("send action");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identify_with_bad_token_closes_4004() {
    let (addr, _state) = start_ws_server().await;

    let url = format!("ws://{addr}/gateway");
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    let (mut write, mut read) = ws_stream.split();

    let identify = serde_json::json!({ "op": 2, "d": { "token": "tok_bogus" } });
    write
        .send(tungstenite::Message::Text(identify.to_string().into()))
        .await
        .expect("send identify");

    let msg = time::timeout(Duration::from_secs(5), read.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("ws read error");

    match msg {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4004);
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn message_fanout_reaches_room_members_only() {
    let (addr, state) = start_ws_server().await;

    let (alice_id, alice_tok) = common::seed_user(&state, "alice").await;
    let (bob_id, bob_tok) = common::seed_user(&state, "bob").await;
    let (carol_id, carol_tok) = common::seed_user(&state, "carol").await;
    let (_dave_id, dave_tok) = common::seed_user(&state, "dave").await;
    let room = common::seed_room(&state, "general", &[&alice_id, &bob_id, &carol_id]).await;

    let mut alice = connect_and_identify(addr, &alice_tok).await;
    let mut bob = connect_and_identify(addr, &bob_tok).await;
    let mut carol = connect_and_identify(addr, &carol_tok).await;
    let mut dave = connect_and_identify(addr, &dave_tok).await;

    send_action(
        &mut alice,
        "send-message",
        serde_json::json!({ "room_id": room.id, "content": "hi" }),
    )
    .await;

    for ws in [&mut alice, &mut bob, &mut carol] {
        let d = next_event(ws, "new-message").await;
        assert_eq!(d["content"], "hi");
        assert_eq!(d["room_id"], room.id.as_str());
        assert_eq!(d["sender"]["name"], "alice");
    }

    // The non-member never sees the room's traffic.
    assert_silent(&mut dave, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn send_message_to_foreign_room_is_rejected() {
    let (addr, state) = start_ws_server().await;

    let (alice_id, _alice_tok) = common::seed_user(&state, "alice").await;
    let (_dave_id, dave_tok) = common::seed_user(&state, "dave").await;
    let room = common::seed_room(&state, "general", &[&alice_id]).await;

    let mut dave = connect_and_identify(addr, &dave_tok).await;

    send_action(
        &mut dave,
        "send-message",
        serde_json::json!({ "room_id": room.id, "content": "sneaky" }),
    )
    .await;

    let d = next_event(&mut dave, "error").await;
    assert_eq!(d["message"], "Access denied");

    // Nothing was committed.
    let stored = state.store.messages_for(&room.id, None, 10).await.unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn reaction_toggle_roundtrip() {
    let (addr, state) = start_ws_server().await;

    let (alice_id, alice_tok) = common::seed_user(&state, "alice").await;
    let (bob_id, bob_tok) = common::seed_user(&state, "bob").await;
    let room = common::seed_room(&state, "general", &[&alice_id, &bob_id]).await;

    let mut alice = connect_and_identify(addr, &alice_tok).await;
    let mut bob = connect_and_identify(addr, &bob_tok).await;

    send_action(
        &mut alice,
        "send-message",
        serde_json::json!({ "room_id": room.id, "content": "react to me" }),
    )
    .await;
    let msg = next_event(&mut bob, "new-message").await;
    let message_id = msg["id"].as_str().unwrap().to_string();

    // First react adds the identity.
    send_action(
        &mut bob,
        "react-to-message",
        serde_json::json!({ "message_id": message_id, "emoji": "👍" }),
    )
    .await;
    let d = next_event(&mut alice, "message-reaction-updated").await;
    assert_eq!(d["id"], message_id.as_str());
    assert_eq!(d["reactions"][0]["emoji"], "👍");
    assert_eq!(d["reactions"][0]["users"][0], bob_id.as_str());

    // Second react from the same identity removes it again.
    send_action(
        &mut bob,
        "react-to-message",
        serde_json::json!({ "message_id": message_id, "emoji": "👍" }),
    )
    .await;
    let d = next_event(&mut alice, "message-reaction-updated").await;
    assert_eq!(d["id"], message_id.as_str());
    assert!(d["reactions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn typing_indicator_expires_without_stop() {
    let (addr, state) = start_ws_server().await;

    let (alice_id, alice_tok) = common::seed_user(&state, "alice").await;
    let (bob_id, bob_tok) = common::seed_user(&state, "bob").await;
    let room = common::seed_room(&state, "general", &[&alice_id, &bob_id]).await;

    let mut alice = connect_and_identify(addr, &alice_tok).await;
    let mut bob = connect_and_identify(addr, &bob_tok).await;

    send_action(
        &mut alice,
        "typing-start",
        serde_json::json!({ "room_id": room.id }),
    )
    .await;

    let d = next_event(&mut bob, "user-typing").await;
    assert_eq!(d["user_id"], alice_id.as_str());
    assert_eq!(d["name"], "alice");

    // No typing-stop ever arrives; the sweeper retires the mark after the
    // 1s timeout.
    let d = next_event(&mut bob, "user-stopped-typing").await;
    assert_eq!(d["user_id"], alice_id.as_str());
    assert_eq!(d["room_id"], room.id.as_str());

    drop(alice);
}

#[tokio::test]
async fn typing_start_does_not_echo_to_sender() {
    let (addr, state) = start_ws_server().await;

    let (alice_id, alice_tok) = common::seed_user(&state, "alice").await;
    let (bob_id, _bob_tok) = common::seed_user(&state, "bob").await;
    let room = common::seed_room(&state, "general", &[&alice_id, &bob_id]).await;

    let mut alice = connect_and_identify(addr, &alice_tok).await;

    send_action(
        &mut alice,
        "typing-start",
        serde_json::json!({ "room_id": room.id }),
    )
    .await;

    // Only the expiry ever reaches the typer's own connection.
    let d = next_event(&mut alice, "user-stopped-typing").await;
    assert_eq!(d["user_id"], alice_id.as_str());
}

#[tokio::test]
async fn disconnect_broadcasts_offline_presence_and_stops_typing() {
    let (addr, state) = start_ws_server().await;

    let (alice_id, alice_tok) = common::seed_user(&state, "alice").await;
    let (bob_id, bob_tok) = common::seed_user(&state, "bob").await;
    let room = common::seed_room(&state, "general", &[&alice_id, &bob_id]).await;

    let mut bob = connect_and_identify(addr, &bob_tok).await;
    let mut alice = connect_and_identify(addr, &alice_tok).await;

    // Bob sees alice come online.
    let d = next_event(&mut bob, "presence-update").await;
    assert_eq!(d["user_id"], alice_id.as_str());
    assert_eq!(d["is_online"], true);

    send_action(
        &mut alice,
        "typing-start",
        serde_json::json!({ "room_id": room.id }),
    )
    .await;
    next_event(&mut bob, "user-typing").await;

    // Alice's transport drops mid-typing.
    alice
        .close(None)
        .await
        .expect("close alice");
    drop(alice);

    // Teardown announces the offline transition, then drains typing marks.
    let d = next_event(&mut bob, "presence-update").await;
    assert_eq!(d["user_id"], alice_id.as_str());
    assert_eq!(d["is_online"], false);
    assert!(d["last_seen"].as_str().is_some());

    let d = next_event(&mut bob, "user-stopped-typing").await;
    assert_eq!(d["user_id"], alice_id.as_str());

    // The transition was also persisted.
    let stored = state.store.find_user(&alice_id).await.unwrap().unwrap();
    assert!(!stored.is_online);
}

#[tokio::test]
async fn second_connection_keeps_identity_online() {
    let (addr, state) = start_ws_server().await;

    let (alice_id, alice_tok) = common::seed_user(&state, "alice").await;
    let (bob_id, bob_tok) = common::seed_user(&state, "bob").await;
    let _room = common::seed_room(&state, "general", &[&alice_id, &bob_id]).await;

    let mut bob = connect_and_identify(addr, &bob_tok).await;

    let mut alice_desktop = connect_and_identify(addr, &alice_tok).await;
    let d = next_event(&mut bob, "presence-update").await;
    assert_eq!(d["is_online"], true);

    // A second device attaching is not a presence transition.
    let alice_phone = connect_and_identify(addr, &alice_tok).await;
    assert_silent(&mut bob, Duration::from_millis(300)).await;

    // Dropping one of the two connections is not a transition either.
    alice_desktop.close(None).await.expect("close");
    drop(alice_desktop);
    assert_silent(&mut bob, Duration::from_millis(300)).await;
    assert!(state.registry.is_online(&alice_id));

    drop(alice_phone);
}

#[tokio::test]
async fn rest_join_subscribes_live_connection() {
    let (addr, state) = start_ws_server().await;

    let (alice_id, alice_tok) = common::seed_user(&state, "alice").await;
    let (_dave_id, dave_tok) = common::seed_user(&state, "dave").await;
    let room = common::seed_room(&state, "general", &[&alice_id]).await;

    let mut alice = connect_and_identify(addr, &alice_tok).await;
    let mut dave = connect_and_identify(addr, &dave_tok).await;

    // Dave joins over REST while his gateway connection is live.
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/api/v1/rooms/{}/join", room.id))
        .header("Authorization", format!("Bearer {dave_tok}"))
        .send()
        .await
        .expect("join request");
    assert!(resp.status().is_success());

    let d = next_event(&mut dave, "room-joined").await;
    assert_eq!(d["room_id"], room.id.as_str());

    // The live connection now receives the room's traffic.
    send_action(
        &mut alice,
        "send-message",
        serde_json::json!({ "room_id": room.id, "content": "welcome" }),
    )
    .await;
    let d = next_event(&mut dave, "new-message").await;
    assert_eq!(d["content"], "welcome");
}

#[tokio::test]
async fn heartbeat_is_acked() {
    let (addr, state) = start_ws_server().await;

    let (_alice_id, alice_tok) = common::seed_user(&state, "alice").await;
    let mut alice = connect_and_identify(addr, &alice_tok).await;

    alice
        .send(tungstenite::Message::Text(
            serde_json::json!({ "op": 1, "d": { "seq": 7 } }).to_string().into(),
        ))
        .await
        .expect("send heartbeat");

    let msg = time::timeout(Duration::from_secs(5), alice.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("ws read error");
    let frame: serde_json::Value =
        serde_json::from_str(&msg.into_text().expect("not text")).expect("parse");
    assert_eq!(frame["op"], 6);
    assert_eq!(frame["d"]["ack"], 7);
}

#[tokio::test]
async fn edit_and_delete_are_pushed_to_the_room() {
    let (addr, state) = start_ws_server().await;

    let (alice_id, alice_tok) = common::seed_user(&state, "alice").await;
    let (bob_id, bob_tok) = common::seed_user(&state, "bob").await;
    let room = common::seed_room(&state, "general", &[&alice_id, &bob_id]).await;

    let mut alice = connect_and_identify(addr, &alice_tok).await;
    let mut bob = connect_and_identify(addr, &bob_tok).await;

    send_action(
        &mut alice,
        "send-message",
        serde_json::json!({ "room_id": room.id, "content": "draft" }),
    )
    .await;
    let msg = next_event(&mut bob, "new-message").await;
    let message_id = msg["id"].as_str().unwrap().to_string();

    send_action(
        &mut alice,
        "edit-message",
        serde_json::json!({ "message_id": message_id, "content": "final" }),
    )
    .await;
    let d = next_event(&mut bob, "message-updated").await;
    assert_eq!(d["id"], message_id.as_str());
    assert_eq!(d["content"], "final");
    assert_eq!(d["edited"], true);

    // Only the author may delete.
    send_action(
        &mut bob,
        "delete-message",
        serde_json::json!({ "message_id": message_id }),
    )
    .await;
    let d = next_event(&mut bob, "error").await;
    assert_eq!(d["message"], "Access denied");

    send_action(
        &mut alice,
        "delete-message",
        serde_json::json!({ "message_id": message_id }),
    )
    .await;
    let d = next_event(&mut bob, "message-deleted").await;
    assert_eq!(d["id"], message_id.as_str());
    assert_eq!(d["room_id"], room.id.as_str());

    assert!(state
        .store
        .find_message(&message_id)
        .await
        .unwrap()
        .is_none());
}
