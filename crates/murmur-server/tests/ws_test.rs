//! Integration tests for upgrade checks, fan-out and error replies over real
//! WebSocket connections.

use futures_util::{SinkExt, StreamExt};
use murmur_server::config::{Config, SeedConversation, TokenEntry};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    conversation: Uuid,
    alice: Uuid,
    bob: Uuid,
    carol: Uuid,
}

impl TestServer {
    /// Start a server on a random port with three users, where only alice
    /// and bob share the seeded conversation.
    async fn start() -> Self {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        let mut config = Config::default();
        config.metrics.enabled = false;
        config.auth.tokens = [("alice", alice), ("bob", bob), ("carol", carol)]
            .into_iter()
            .map(|(token, user_id)| TokenEntry {
                token: token.into(),
                user_id,
            })
            .collect();
        config.seed.conversations = vec![SeedConversation {
            id: conversation,
            user1_id: alice,
            user2_id: bob,
        }];

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            murmur_server::serve(listener, config).await.unwrap();
        });

        Self {
            addr,
            conversation,
            alice,
            bob,
            carol,
        }
    }

    fn chat_url(&self, conversation: impl std::fmt::Display, token: &str) -> String {
        format!("ws://{}/ws/chat/{}?token={}", self.addr, conversation, token)
    }

    async fn chat(&self, token: &str) -> Socket {
        let (socket, _) = tokio_tungstenite::connect_async(self.chat_url(self.conversation, token))
            .await
            .expect("chat connection");
        settle().await;
        socket
    }

    async fn notifications(&self, token: &str) -> Socket {
        let url = format!("ws://{}/ws/notifications?token={}", self.addr, token);
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("notification connection");
        settle().await;
        socket
    }
}

/// The upgrade response arrives before the server registers the socket.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Status code of a rejected upgrade.
async fn rejected_status(request: impl IntoClientRequest + Unpin) -> u16 {
    match tokio_tungstenite::connect_async(request).await {
        Err(WsError::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("upgrade should have been rejected"),
    }
}

async fn send(socket: &mut Socket, frame: Value) {
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Next non-presence event, or `None` after a quiet period.
async fn next_event(socket: &mut Socket) -> Option<Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .ok()??
            .ok()?;
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["event"] != "presence" {
                return Some(value);
            }
        }
    }
}

/// Skip events until one named `name` arrives.
async fn expect_event(socket: &mut Socket, name: &str) -> Value {
    loop {
        let event = next_event(socket)
            .await
            .unwrap_or_else(|| panic!("timed out waiting for {name}"));
        if event["event"] == name {
            return event;
        }
    }
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let server = TestServer::start().await;

    let url = format!("ws://{}/ws/chat/{}", server.addr, server.conversation);
    assert_eq!(rejected_status(url).await, 401);
    assert_eq!(rejected_status(server.chat_url(server.conversation, "mallory")).await, 401);
}

#[tokio::test]
async fn test_bearer_header_is_accepted() {
    let server = TestServer::start().await;

    let url = format!("ws://{}/ws/chat/{}", server.addr, server.conversation);
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", "Bearer alice".parse().unwrap());

    assert!(tokio_tungstenite::connect_async(request).await.is_ok());
}

#[tokio::test]
async fn test_upgrade_checks_conversation() {
    let server = TestServer::start().await;

    assert_eq!(rejected_status(server.chat_url("not-a-uuid", "alice")).await, 400);
    assert_eq!(rejected_status(server.chat_url(Uuid::new_v4(), "alice")).await, 404);
    assert_eq!(rejected_status(server.chat_url(server.conversation, "carol")).await, 403);
}

#[tokio::test]
async fn test_message_fans_out_to_both_participants() {
    let server = TestServer::start().await;
    let mut alice = server.chat("alice").await;
    let mut bob = server.chat("bob").await;

    send(&mut alice, json!({"event": "send_message", "content": "hello bob"})).await;

    for socket in [&mut alice, &mut bob] {
        let event = expect_event(socket, "new_message").await;
        assert_eq!(event["v"], 1);
        assert_eq!(event["data"]["content"], "hello bob");
        assert_eq!(event["data"]["sender_id"], server.alice.to_string());
        assert_eq!(event["data"]["receiver_id"], server.bob.to_string());
    }

    let unread = expect_event(&mut bob, "unread_update").await;
    assert_eq!(unread["user_id"], server.bob.to_string());
    assert_eq!(unread["unread"], 1);
}

#[tokio::test]
async fn test_absent_receiver_gets_notification() {
    let server = TestServer::start().await;
    let mut alice = server.chat("alice").await;

    let mut bob_notes = server.notifications("bob").await;

    send(&mut alice, json!({"event": "send_message", "content": "are you there?"})).await;

    let note = expect_event(&mut bob_notes, "notification").await;
    assert_eq!(note["type"], "message");
    assert_eq!(note["from_user_id"], server.alice.to_string());
    assert_eq!(note["preview"], "are you there?");
}

#[tokio::test]
async fn test_unknown_event_keeps_connection_open() {
    let server = TestServer::start().await;
    let mut alice = server.chat("alice").await;
    let mut bob = server.chat("bob").await;

    send(&mut alice, json!({"event": "frobnicate"})).await;

    let error = expect_event(&mut alice, "error").await;
    assert_eq!(error["code"], "unknown_event");
    assert_eq!(error["source_event"], "frobnicate");

    // The connection still works afterwards.
    send(&mut alice, json!({"event": "typing_start"})).await;
    let typing = expect_event(&mut bob, "typing").await;
    assert_eq!(typing["user_id"], server.alice.to_string());
    assert_eq!(typing["is_typing"], true);
}

#[tokio::test]
async fn test_presence_is_broadcast_to_other_users() {
    let server = TestServer::start().await;
    let mut alice = server.chat("alice").await;
    let _bob = server.chat("bob").await;

    let presence = loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), alice.next())
            .await
            .expect("presence event")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["event"] == "presence" {
                break value;
            }
        }
    };
    assert_eq!(presence["user_id"], server.bob.to_string());
    assert_eq!(presence["status"], "online");
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start().await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""status":"ok""#));
}
