//! End-to-end tests against a running server.

use chatline_protocol::codec::MAX_FRAME_SIZE;
use chatline_protocol::{codec, ClientEvent, EndReason, Heartbeat, ServerEvent};
use chatline_server::{build_app, AppState, Config};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> Config {
    let mut config = Config::default();
    config.metrics.enabled = false;
    config
}

async fn spawn_server(config: Config) -> SocketAddr {
    let app = build_app(AppState::start(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn recv(client: &mut Client) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return codec::decode_json(&text).unwrap(),
            Message::Binary(data) => return codec::decode(&data).unwrap(),
            _ => continue,
        }
    }
}

/// Skip events until one named `name` arrives.
async fn expect(client: &mut Client, name: &str) -> ServerEvent {
    loop {
        let event = recv(client).await;
        if event.name() == name {
            return event;
        }
    }
}

async fn send(client: &mut Client, event: ClientEvent) {
    let text = codec::encode_json(&event).unwrap();
    client.send(Message::Text(text)).await.unwrap();
}

async fn open(addr: SocketAddr) -> Client {
    let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let connected = recv(&mut client).await;
    assert_eq!(connected.name(), "connected");
    client
}

/// Skip `message:receive` events until one carries `message`.
async fn expect_message(client: &mut Client, message: &Value) {
    loop {
        if let ServerEvent::MessageReceive(received) = expect(client, "message:receive").await {
            if received == *message {
                return;
            }
        }
    }
}

/// Join `room` and wait until the join has been applied.
async fn join(client: &mut Client, room: &str) {
    send(client, ClientEvent::chat_join(room)).await;
    send(client, ClientEvent::message_send(room, json!({"ready": true}))).await;
    expect_message(client, &json!({"ready": true})).await;
}

fn ping(timestamp: u64) -> ClientEvent {
    ClientEvent::Ping(Some(Heartbeat {
        timestamp: Some(timestamp),
    }))
}

/// Send a plain HTTP request and return the raw response.
async fn request(addr: SocketAddr, method: &str, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(body.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn publish(addr: SocketAddr, room: &str, message: &Value) -> String {
    let path = format!("/internal/chats/{room}/messages");
    request(addr, "POST", &path, &message.to_string()).await
}

/// Open a connection and announce `user`.
async fn online(addr: SocketAddr, user: &str) -> Client {
    let mut client = open(addr).await;
    send(&mut client, ClientEvent::user_join(user)).await;
    expect(&mut client, "presence:snapshot").await;
    client
}

#[tokio::test]
async fn test_presence_lifecycle() {
    let addr = spawn_server(test_config()).await;
    let mut ana = online(addr, "ana").await;

    let mut ben = open(addr).await;
    send(&mut ben, ClientEvent::user_join("ben")).await;
    match expect(&mut ben, "presence:snapshot").await {
        ServerEvent::PresenceSnapshot(users) => {
            assert!(users.iter().any(|u| u.user_id == "ana"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        expect(&mut ana, "user:online").await,
        ServerEvent::UserOnline("ana".into())
    );
    assert_eq!(
        expect(&mut ana, "user:online").await,
        ServerEvent::UserOnline("ben".into())
    );

    ben.close(None).await.unwrap();
    assert_eq!(
        expect(&mut ana, "user:offline").await,
        ServerEvent::UserOffline("ben".into())
    );
}

#[tokio::test]
async fn test_room_message_and_typing() {
    let addr = spawn_server(test_config()).await;
    let mut ana = online(addr, "ana").await;
    let mut ben = online(addr, "ben").await;

    send(&mut ana, ClientEvent::chat_join("chat-1")).await;
    send(&mut ana, ClientEvent::message_send("chat-1", json!({"content": "first"}))).await;
    // The echo proves ana's join was processed
    expect(&mut ana, "message:receive").await;

    send(&mut ben, ClientEvent::chat_join("chat-1")).await;
    send(&mut ben, ClientEvent::typing_start("chat-1", "ben", "Ben")).await;
    match expect(&mut ana, "typing:start").await {
        ServerEvent::TypingStart(typing) => assert_eq!(typing.user_name, "Ben"),
        other => panic!("unexpected {other:?}"),
    }

    send(&mut ana, ClientEvent::message_send("chat-1", json!({"content": "hi"}))).await;
    for client in [&mut ana, &mut ben] {
        assert_eq!(
            expect(client, "message:receive").await,
            ServerEvent::MessageReceive(json!({"content": "hi"}))
        );
    }
}

#[tokio::test]
async fn test_call_ends_when_peer_disconnects() {
    let addr = spawn_server(test_config()).await;
    let mut ana = online(addr, "ana").await;
    let mut ben = online(addr, "ben").await;

    send(
        &mut ana,
        ClientEvent::call_initiate("ana", "ben", json!({"type": "offer", "sdp": "x"})),
    )
    .await;
    match expect(&mut ben, "call:incoming").await {
        ServerEvent::CallIncoming(incoming) => assert_eq!(incoming.from, "ana"),
        other => panic!("unexpected {other:?}"),
    }

    send(&mut ben, ClientEvent::call_answer("ana", json!({"type": "answer"}))).await;
    expect(&mut ana, "call:answered").await;

    ben.close(None).await.unwrap();
    assert_eq!(
        expect(&mut ana, "call:ended").await,
        ServerEvent::call_ended("ben", EndReason::Disconnected)
    );
}

#[tokio::test]
async fn test_ping_is_answered() {
    let addr = spawn_server(test_config()).await;
    let mut client = open(addr).await;

    send(&mut client, ping(42)).await;
    assert_eq!(
        recv(&mut client).await,
        ServerEvent::pong(Heartbeat { timestamp: Some(42) })
    );
}

#[tokio::test]
async fn test_bare_ping_is_answered() {
    let addr = spawn_server(test_config()).await;
    let mut client = open(addr).await;

    client
        .send(Message::Text("{\"event\":\"ping\"}".into()))
        .await
        .unwrap();
    assert_eq!(recv(&mut client).await, ServerEvent::pong(Heartbeat::default()));
}

#[tokio::test]
async fn test_binary_client_gets_binary_replies() {
    let addr = spawn_server(test_config()).await;
    let mut client = open(addr).await;

    let frame = codec::encode(&ping(7)).unwrap();
    client.send(Message::Binary(frame.to_vec())).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Binary(data) = reply else {
        panic!("expected binary reply, got {reply:?}");
    };
    let event: ServerEvent = codec::decode(&data).unwrap();
    assert_eq!(event, ServerEvent::pong(Heartbeat { timestamp: Some(7) }));
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let addr = spawn_server(test_config()).await;
    let mut client = open(addr).await;

    client
        .send(Message::Text("{\"event\":\"nope\"}".into()))
        .await
        .unwrap();
    send(&mut client, ping(1)).await;
    assert_eq!(expect(&mut client, "pong").await.name(), "pong");
}

#[tokio::test]
async fn test_published_message_reaches_room() {
    let addr = spawn_server(test_config()).await;
    let mut ana = online(addr, "ana").await;
    let mut ben = online(addr, "ben").await;
    join(&mut ana, "chat-1").await;
    join(&mut ben, "chat-1").await;

    let message = json!({"id": "m-1", "content": "saved"});
    let response = publish(addr, "chat-1", &message).await;
    assert!(response.starts_with("HTTP/1.1 202"), "{response}");

    expect_message(&mut ana, &message).await;
    expect_message(&mut ben, &message).await;
}

#[tokio::test]
async fn test_publish_rejects_bad_input() {
    let addr = spawn_server(test_config()).await;

    let response = publish(addr, "%01", &json!({"content": "x"})).await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    let response = publish(addr, "chat-1", &Value::Null).await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");

    let mut config = test_config();
    config.transport.internal_api = false;
    let addr = spawn_server(config).await;
    let response = publish(addr, "chat-1", &json!({"content": "x"})).await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");
}

#[tokio::test]
async fn test_unencodable_event_keeps_connection() {
    let addr = spawn_server(test_config()).await;
    let mut ana = online(addr, "ana").await;
    join(&mut ana, "chat-1").await;

    let oversized = json!({"content": "x".repeat(MAX_FRAME_SIZE)});
    let response = publish(addr, "chat-1", &oversized).await;
    assert!(response.starts_with("HTTP/1.1 202"), "{response}");

    let after = json!({"content": "after"});
    publish(addr, "chat-1", &after).await;
    expect_message(&mut ana, &after).await;

    send(&mut ana, ping(3)).await;
    expect(&mut ana, "pong").await;
}

#[tokio::test]
async fn test_refuses_over_capacity() {
    let mut config = test_config();
    config.limits.max_connections = 1;
    let addr = spawn_server(config).await;

    let mut first = open(addr).await;
    match connect_async(format!("ws://{addr}/ws")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 503),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("second connection should be refused"),
    }

    // Closing the first connection frees its slot
    first.close(None).await.unwrap();
    let mut admitted = None;
    for _ in 0..50 {
        if let Ok((client, _)) = connect_async(format!("ws://{addr}/ws")).await {
            admitted = Some(client);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(admitted.is_some(), "slot was not released");
}

#[tokio::test]
async fn test_health() {
    let addr = spawn_server(test_config()).await;
    let _client = open(addr).await;

    let response = request(addr, "GET", "/health", "").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"status\":\"ok\""));
    assert!(response.contains("\"connections\":1"));
}
