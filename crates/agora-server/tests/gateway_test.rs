//! End-to-end tests: real router on a random port, driven over WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use agora_api::state::{AppState, AppStateInner};
use agora_db::Database;
use agora_gateway::auth::create_token;
use agora_gateway::connection::GatewaySettings;
use agora_gateway::mirror::PresenceMirror;
use agora_types::models::{FriendshipStatus, NotificationKey, NotificationKind};

const SECRET: &str = "integration-secret";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: AppState,
}

async fn start_test_server() -> TestServer {
    start_test_server_with(GatewaySettings::default()).await
}

async fn start_test_server_with(settings: GatewaySettings) -> TestServer {
    let db = Arc::new(Database::open_in_memory().expect("Failed to open DB"));
    let state = AppStateInner::new(
        db,
        SECRET.into(),
        "access_token".into(),
        PresenceMirror::disabled(),
        settings,
    );

    let app = agora_server::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, state }
}

impl TestServer {
    fn create_user(&self, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.db.create_user(id, username).unwrap();
        id
    }

    async fn connect(&self, user_id: Uuid) -> Socket {
        let token = create_token(SECRET, user_id, "user", chrono::Duration::hours(1)).unwrap();
        let ws = self.connect_with_cookie(Some(&format!("access_token={}", token))).await;
        self.wait_until(|state| state.registry.is_online(user_id)).await;
        ws
    }

    async fn connect_with_cookie(&self, cookie: Option<&str>) -> Socket {
        let mut request = format!("ws://{}/gateway", self.addr)
            .into_client_request()
            .unwrap();
        if let Some(cookie) = cookie {
            request
                .headers_mut()
                .insert("Cookie", cookie.parse().unwrap());
        }
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .expect("WebSocket handshake failed");
        ws
    }

    async fn wait_until(&self, condition: impl Fn(&AppState) -> bool) {
        for _ in 0..100 {
            if condition(&self.state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached within 2s");
    }
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(ws: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("transport error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn assert_silent(ws: &mut Socket) {
    match tokio::time::timeout(Duration::from_millis(200), ws.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Ping(_)))) => {}
        Ok(other) => panic!("expected no frame, got {:?}", other),
    }
}

async fn send_json(ws: &mut Socket, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn connection_without_cookie_is_closed_with_policy_code() {
    let server = start_test_server().await;
    let mut ws = server.connect_with_cookie(None).await;

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match msg {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected policy close, got {:?}", other),
    }
    assert_eq!(server.state.registry.online_count(), 0);
}

#[tokio::test]
async fn token_for_unknown_user_is_closed_with_policy_code() {
    let server = start_test_server().await;
    let token = create_token(SECRET, Uuid::new_v4(), "ghost", chrono::Duration::hours(1)).unwrap();
    let mut ws = server
        .connect_with_cookie(Some(&format!("access_token={}", token)))
        .await;

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(msg, Message::Close(Some(frame)) if frame.code == CloseCode::Policy));
}

#[tokio::test]
async fn chat_between_connected_friends() {
    let server = start_test_server().await;
    let alice = server.create_user("alice");
    let bob = server.create_user("bob");
    let friendship = Uuid::new_v4();
    server
        .state
        .db
        .create_friendship(friendship, alice, bob, FriendshipStatus::Accepted)
        .unwrap();

    let mut alice_ws = server.connect(alice).await;
    let mut bob_ws = server.connect(bob).await;

    send_json(
        &mut alice_ws,
        json!({ "type": "message", "sender": alice, "recipient": bob, "content": "hi" }),
    )
    .await;

    let ack = next_json(&mut alice_ws).await;
    assert_eq!(ack["type"], "message");
    assert_eq!(ack["edited"], false);
    assert_eq!(ack["content"], "hi");
    assert_eq!(ack["friendship_id"], friendship.to_string());

    let message_id: Uuid = ack["message_id"].as_str().unwrap().parse().unwrap();
    let stored = server.state.db.get_message(message_id).unwrap().unwrap();
    assert_eq!(stored.sender_id, alice);
    assert_eq!(stored.recipient_id, bob);

    let delivered = next_json(&mut bob_ws).await;
    assert_eq!(delivered, ack);

    let key = NotificationKey::Conversation {
        kind: NotificationKind::Message,
        sender_id: alice,
        recipient_id: bob,
    };
    server
        .wait_until(|state| state.db.find_notification(&key).unwrap().is_some())
        .await;
    let notification = server.state.db.find_notification(&key).unwrap().unwrap();
    assert!(notification.seen);
    assert_eq!(server.state.db.count_notifications(&key).unwrap(), 1);
}

#[tokio::test]
async fn unknown_and_malformed_frames_keep_connection_open() {
    let server = start_test_server().await;
    let alice = server.create_user("alice");
    let bob = server.create_user("bob");
    server
        .state
        .db
        .create_friendship(Uuid::new_v4(), bob, alice, FriendshipStatus::Accepted)
        .unwrap();

    let mut alice_ws = server.connect(alice).await;

    send_json(&mut alice_ws, json!({ "type": "typing", "sender": alice })).await;
    alice_ws
        .send(Message::Text("{definitely not json".into()))
        .await
        .unwrap();
    assert_silent(&mut alice_ws).await;

    // Bob is offline: the message is stored and acknowledged, the
    // notification waits unseen.
    send_json(
        &mut alice_ws,
        json!({ "type": "message", "sender": alice, "recipient": bob, "content": "later" }),
    )
    .await;
    let ack = next_json(&mut alice_ws).await;
    assert_eq!(ack["content"], "later");

    let key = NotificationKey::Conversation {
        kind: NotificationKind::Message,
        sender_id: alice,
        recipient_id: bob,
    };
    server
        .wait_until(|state| state.db.find_notification(&key).unwrap().is_some())
        .await;
    assert!(!server.state.db.find_notification(&key).unwrap().unwrap().seen);
}

#[tokio::test]
async fn chat_without_friendship_is_dropped() {
    let server = start_test_server().await;
    let alice = server.create_user("alice");
    let bob = server.create_user("bob");
    let mut alice_ws = server.connect(alice).await;
    let mut bob_ws = server.connect(bob).await;

    send_json(
        &mut alice_ws,
        json!({ "type": "message", "sender": alice, "recipient": bob, "content": "hi" }),
    )
    .await;

    assert_silent(&mut alice_ws).await;
    assert_silent(&mut bob_ws).await;
    assert_eq!(server.state.db.count_messages_between(alice, bob).unwrap(), 0);
    assert!(server.state.db.list_notifications(bob, 10).unwrap().is_empty());
}

#[tokio::test]
async fn video_invite_is_relayed_to_callee() {
    let server = start_test_server().await;
    let alice = server.create_user("alice");
    let bob = server.create_user("bob");
    let mut alice_ws = server.connect(alice).await;
    let mut bob_ws = server.connect(bob).await;
    let room = Uuid::new_v4();

    send_json(
        &mut alice_ws,
        json!({ "type": "video-call-invite", "room": room, "sender": alice, "recipient": bob }),
    )
    .await;

    let relay = next_json(&mut bob_ws).await;
    assert_eq!(relay["type"], "video-call-invite");
    assert_eq!(relay["room_id"], room.to_string());
    assert_eq!(relay["sender_id"], alice.to_string());
    assert_eq!(relay["recipient_id"], bob.to_string());
    assert!(relay["date"].is_string());
    assert_silent(&mut alice_ws).await;
}

#[tokio::test]
async fn disconnect_unregisters_user() {
    let server = start_test_server().await;
    let alice = server.create_user("alice");
    let mut ws = server.connect(alice).await;
    assert!(server.state.registry.is_online(alice));

    ws.close(None).await.unwrap();
    drop(ws);

    server
        .wait_until(|state| !state.registry.is_online(alice))
        .await;
    assert_eq!(server.state.registry.online_count(), 0);
}

#[tokio::test]
async fn reconnect_supersedes_and_stale_close_keeps_new_connection() {
    let server = start_test_server().await;
    let alice = server.create_user("alice");
    let bob = server.create_user("bob");
    server
        .state
        .db
        .create_friendship(Uuid::new_v4(), bob, alice, FriendshipStatus::Accepted)
        .unwrap();

    let mut first = server.connect(alice).await;
    let first_conn = server.state.registry.lookup(alice).unwrap().conn_id();
    let mut second = server.connect_with_cookie(Some(&format!(
        "access_token={}",
        create_token(SECRET, alice, "alice", chrono::Duration::hours(1)).unwrap()
    )))
    .await;
    server
        .wait_until(|state| {
            state
                .registry
                .lookup(alice)
                .is_some_and(|h| h.conn_id() != first_conn)
        })
        .await;

    first.close(None).await.unwrap();
    drop(first);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.state.registry.is_online(alice));

    let mut bob_ws = server.connect(bob).await;
    send_json(
        &mut bob_ws,
        json!({ "type": "message", "sender": bob, "recipient": alice, "content": "which one?" }),
    )
    .await;
    next_json(&mut bob_ws).await;
    let delivered = next_json(&mut second).await;
    assert_eq!(delivered["content"], "which one?");
}

#[tokio::test]
async fn storage_failure_drops_the_chat_but_keeps_the_socket() {
    let server = start_test_server().await;
    let alice = server.create_user("alice");
    let bob = server.create_user("bob");
    server
        .state
        .db
        .create_friendship(Uuid::new_v4(), alice, bob, FriendshipStatus::Accepted)
        .unwrap();
    let mut alice_ws = server.connect(alice).await;
    let mut bob_ws = server.connect(bob).await;

    server
        .state
        .db
        .with_conn_mut(|conn| {
            conn.execute_batch("DROP TABLE messages")?;
            Ok(())
        })
        .unwrap();

    send_json(
        &mut alice_ws,
        json!({ "type": "message", "sender": alice, "recipient": bob, "content": "lost" }),
    )
    .await;
    assert_silent(&mut alice_ws).await;
    assert_silent(&mut bob_ws).await;
    assert!(server.state.db.list_notifications(bob, 10).unwrap().is_empty());

    let room = Uuid::new_v4();
    send_json(
        &mut alice_ws,
        json!({ "type": "video-call-invite", "room": room, "sender": alice, "recipient": bob }),
    )
    .await;
    let relay = next_json(&mut bob_ws).await;
    assert_eq!(relay["room_id"], room.to_string());
    assert!(server.state.registry.is_online(alice));
}

#[tokio::test]
async fn heartbeat_traffic_does_not_keep_an_idle_client_alive() {
    let server = start_test_server_with(GatewaySettings {
        heartbeat_interval: Duration::from_millis(50),
        idle_timeout: Duration::from_millis(600),
    })
    .await;
    let alice = server.create_user("alice");
    let ws = server.connect(alice).await;

    // Keep reading so the client answers every ping.
    let (mut sink, mut stream) = ws.split();
    let reader = tokio::spawn(async move { while let Some(Ok(_)) = stream.next().await {} });

    // Data frames push the deadline back.
    let typing = json!({ "type": "typing", "sender": alice }).to_string();
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        sink.send(Message::Text(typing.clone().into())).await.unwrap();
    }
    assert!(server.state.registry.is_online(alice));

    // Pongs alone do not.
    server
        .wait_until(|state| !state.registry.is_online(alice))
        .await;
    reader.abort();
}
