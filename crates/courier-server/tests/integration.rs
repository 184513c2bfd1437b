//! End-to-end integration tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use courier_core::{Identity, PermissionTier, SystemClock};
use courier_directory::{AccountDirectory, ConnectionConfig, SqliteDirectory, new_file};
use courier_server::CourierServer;
use courier_server::metrics::detached_handle;
use courier_settings::{RelaySettings, ServerSettings};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// A running server plus the temp dir holding its database.
struct TestServer {
    ws_url: String,
    http_addr: String,
    server: Arc<CourierServer>,
    _dir: tempfile::TempDir,
}

/// Boot a server on an auto-assigned port. Accounts: `root` (root),
/// `admin` (admin), `alice` and `bob` (normal, created by admin). Every
/// password is `pw`.
async fn boot_server() -> TestServer {
    boot_server_with(ServerSettings::default()).await
}

/// [`boot_server`] with custom server settings; host and port are forced to
/// `127.0.0.1:0`.
async fn boot_server_with(settings: ServerSettings) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("courier.db");
    let pool = new_file(db_path.to_str().unwrap(), &ConnectionConfig::default()).unwrap();
    let directory = Arc::new(SqliteDirectory::open(pool).unwrap());
    let _ = directory.ensure_root("root", "pw").unwrap();
    let _ = directory
        .create_account(&Identity::from("root"), PermissionTier::Root, "admin", "pw")
        .unwrap();
    for name in ["alice", "bob"] {
        let _ = directory
            .create_account(&Identity::from("admin"), PermissionTier::Admin, name, "pw")
            .unwrap();
    }

    let settings = ServerSettings {
        host: "127.0.0.1".into(),
        port: 0,
        ..settings
    };
    let server = Arc::new(CourierServer::new(
        settings,
        &RelaySettings::default(),
        directory,
        Arc::new(SystemClock),
        detached_handle(),
    ));
    let addr = server.listen().await.unwrap();

    TestServer {
        ws_url: format!("ws://{addr}/ws"),
        http_addr: addr.to_string(),
        server,
        _dir: dir,
    }
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn send_raw(ws: &mut WsStream, text: &str) {
    ws.send(Message::text(text.to_owned())).await.unwrap();
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Wait until the server ends the connection. Panics if a text frame
/// arrives first.
async fn expect_closed(ws: &mut WsStream) {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("timeout waiting for close") {
            None | Some(Err(_) | Ok(Message::Close(_))) => return,
            Some(Ok(Message::Text(text))) => panic!("unexpected frame before close: {text}"),
            Some(Ok(_)) => {}
        }
    }
}

/// Assert nothing arrives within a short window.
async fn expect_silence(ws: &mut WsStream) {
    let res = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(res.is_err(), "expected no frame, got {res:?}");
}

async fn login(url: &str, name: &str) -> WsStream {
    let mut ws = connect(url).await;
    send_json(&mut ws, json!({"type": "login", "name": name, "password": "pw"})).await;
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["type"], "login");
    assert_eq!(resp["code"], 0, "login as {name} failed: {resp}");
    ws
}

#[tokio::test]
async fn login_returns_usertype() {
    let t = boot_server().await;
    let mut ws = connect(&t.ws_url).await;
    send_json(&mut ws, json!({"type": "login", "name": "admin", "password": "pw"})).await;
    let resp = read_json(&mut ws).await;
    assert_eq!(resp, json!({"version": 1, "type": "login", "code": 0, "usertype": "admin"}));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let t = boot_server().await;
    let mut ws = connect(&t.ws_url).await;
    send_json(&mut ws, json!({"type": "login", "name": "alice", "password": "nope"})).await;
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["code"], 2000);

    // Still unauthenticated.
    send_json(&mut ws, json!({"type": "sendmsg", "receivers": ["bob"], "msg": "hi"})).await;
    assert_eq!(read_json(&mut ws).await["code"], 1300);
}

#[tokio::test]
async fn online_delivery() {
    let t = boot_server().await;
    let mut alice = login(&t.ws_url, "alice").await;
    let mut bob = login(&t.ws_url, "bob").await;

    send_json(
        &mut alice,
        json!({"type": "sendmsg", "receivers": ["bob"], "msg": "hello bob"}),
    )
    .await;
    let ack = read_json(&mut alice).await;
    assert_eq!(ack, json!({"version": 1, "type": "sendmsg", "code": 0}));

    let msg = read_json(&mut bob).await;
    assert_eq!(msg["type"], "recvmsg");
    assert_eq!(msg["sender"], "alice");
    assert_eq!(msg["msg"], "hello bob");
    assert!(msg["time"].is_i64());
}

#[tokio::test]
async fn sender_can_message_itself() {
    let t = boot_server().await;
    let mut alice = login(&t.ws_url, "alice").await;
    send_json(
        &mut alice,
        json!({"type": "sendmsg", "receivers": ["alice"], "msg": "note"}),
    )
    .await;
    assert_eq!(read_json(&mut alice).await["type"], "sendmsg");
    let msg = read_json(&mut alice).await;
    assert_eq!(msg["type"], "recvmsg");
    assert_eq!(msg["msg"], "note");
}

#[tokio::test]
async fn offline_messages_replay_on_login() {
    let t = boot_server().await;
    let mut alice = login(&t.ws_url, "alice").await;
    for text in ["first", "second"] {
        send_json(
            &mut alice,
            json!({"type": "sendmsg", "receivers": ["bob"], "msg": text}),
        )
        .await;
        assert_eq!(read_json(&mut alice).await["code"], 0);
    }

    let mut bob = login(&t.ws_url, "bob").await;
    assert_eq!(read_json(&mut bob).await["msg"], "first");
    assert_eq!(read_json(&mut bob).await["msg"], "second");
    expect_silence(&mut bob).await;

    // Replayed once only.
    bob.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut bob = login(&t.ws_url, "bob").await;
    expect_silence(&mut bob).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backlog_larger_than_outbound_buffer_replays_completely() {
    const BACKLOG: usize = 300;
    let t = boot_server_with(ServerSettings {
        outbound_buffer: 8,
        ..ServerSettings::default()
    })
    .await;

    let mut alice = login(&t.ws_url, "alice").await;
    for i in 0..BACKLOG {
        send_json(
            &mut alice,
            json!({"type": "sendmsg", "receivers": ["bob"], "msg": format!("m{i}")}),
        )
        .await;
        assert_eq!(read_json(&mut alice).await["code"], 0);
    }
    assert_eq!(t.server.context().mailbox().buffered_for(&Identity::from("bob")), BACKLOG);

    let mut bob = login(&t.ws_url, "bob").await;
    for i in 0..BACKLOG {
        let msg = read_json(&mut bob).await;
        assert_eq!(msg["type"], "recvmsg");
        assert_eq!(msg["msg"], format!("m{i}"));
    }
    expect_silence(&mut bob).await;
}

#[tokio::test]
async fn second_login_replaces_first_connection() {
    let t = boot_server().await;
    let mut first = login(&t.ws_url, "bob").await;
    let mut second = login(&t.ws_url, "bob").await;

    expect_closed(&mut first).await;

    let mut alice = login(&t.ws_url, "alice").await;
    send_json(
        &mut alice,
        json!({"type": "sendmsg", "receivers": ["bob"], "msg": "to the new one"}),
    )
    .await;
    assert_eq!(read_json(&mut alice).await["code"], 0);
    assert_eq!(read_json(&mut second).await["msg"], "to the new one");
}

#[tokio::test]
async fn nineteen_malformed_frames_keep_connection_open() {
    let t = boot_server().await;
    let mut ws = connect(&t.ws_url).await;
    for _ in 0..19 {
        send_raw(&mut ws, "{not json").await;
        let resp = read_json(&mut ws).await;
        assert_eq!(resp["code"], 1000);
        assert_eq!(resp["type"], "");
    }
    send_json(&mut ws, json!({"type": "login", "name": "alice", "password": "pw"})).await;
    assert_eq!(read_json(&mut ws).await["code"], 0);
}

#[tokio::test]
async fn twentieth_malformed_frame_closes_connection() {
    let t = boot_server().await;
    let mut ws = connect(&t.ws_url).await;
    for _ in 0..19 {
        send_raw(&mut ws, "garbage").await;
        assert_eq!(read_json(&mut ws).await["code"], 1000);
    }
    send_raw(&mut ws, "garbage").await;
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn unknown_command_and_missing_fields() {
    let t = boot_server().await;
    let mut ws = connect(&t.ws_url).await;

    send_json(&mut ws, json!({"type": "dance"})).await;
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["type"], "dance");
    assert_eq!(resp["code"], 1200);

    send_json(&mut ws, json!({"name": "alice"})).await;
    assert_eq!(read_json(&mut ws).await["code"], 1100);

    send_json(&mut ws, json!({"type": "login", "name": "alice"})).await;
    assert_eq!(read_json(&mut ws).await["code"], 1100);
}

#[tokio::test]
async fn normal_user_cannot_manage_accounts() {
    let t = boot_server().await;
    let mut alice = login(&t.ws_url, "alice").await;
    send_json(&mut alice, json!({"type": "adduser", "name": "eve", "password": "pw"})).await;
    assert_eq!(read_json(&mut alice).await["code"], 1300);
    send_json(&mut alice, json!({"type": "deluser", "users": ["bob"]})).await;
    assert_eq!(read_json(&mut alice).await["code"], 1300);
}

#[tokio::test]
async fn admin_adds_and_lists_users() {
    let t = boot_server().await;
    let mut admin = login(&t.ws_url, "admin").await;

    send_json(&mut admin, json!({"type": "adduser", "name": "carol", "password": "pw"})).await;
    assert_eq!(read_json(&mut admin).await, json!({"version": 1, "type": "adduser", "code": 0}));

    send_json(&mut admin, json!({"type": "adduser", "name": "carol", "password": "pw"})).await;
    assert_eq!(read_json(&mut admin).await["code"], 3000);

    send_json(&mut admin, json!({"type": "listuser"})).await;
    let resp = read_json(&mut admin).await;
    assert_eq!(resp["type"], "listuser");
    assert_eq!(resp["users"], json!(["alice", "bob", "carol"]));

    send_json(
        &mut admin,
        json!({"type": "listuser", "start": 18_446_744_073_709_551_615_u64}),
    )
    .await;
    let resp = read_json(&mut admin).await;
    assert_eq!(resp["code"], 0);
    assert_eq!(resp["users"], json!([]));

    // The new account can log in as a normal user.
    let mut carol = connect(&t.ws_url).await;
    send_json(&mut carol, json!({"type": "login", "name": "carol", "password": "pw"})).await;
    assert_eq!(read_json(&mut carol).await["usertype"], "normal");
}

#[tokio::test]
async fn admin_cannot_delete_root_created_accounts() {
    let t = boot_server().await;
    let mut root = login(&t.ws_url, "root").await;
    send_json(&mut root, json!({"type": "adduser", "name": "ops", "password": "pw"})).await;
    assert_eq!(read_json(&mut root).await["code"], 0);

    let mut admin = login(&t.ws_url, "admin").await;
    send_json(&mut admin, json!({"type": "deluser", "users": ["ops"]})).await;
    assert_eq!(read_json(&mut admin).await["code"], 4000);

    send_json(&mut root, json!({"type": "deluser", "users": ["ops"]})).await;
    assert_eq!(read_json(&mut root).await["code"], 0);
}

#[tokio::test]
async fn health_reports_online_users() {
    let t = boot_server().await;
    let _alice = login(&t.ws_url, "alice").await;

    let mut stream = tokio::net::TcpStream::connect(&t.http_addr).await.unwrap();
    let req = format!(
        "GET /health HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        t.http_addr
    );
    tokio::io::AsyncWriteExt::write_all(&mut stream, req.as_bytes())
        .await
        .unwrap();
    let mut buf = Vec::new();
    let _ = timeout(TIMEOUT, tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf))
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.starts_with("HTTP/1.1 200"));
    let body = text.split("\r\n\r\n").nth(1).unwrap();
    let parsed: Value = serde_json::from_str(body).unwrap();
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["online_users"], 1);
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let t = boot_server().await;
    let mut alice = login(&t.ws_url, "alice").await;
    t.server
        .shutdown()
        .graceful_shutdown(Some(Duration::from_secs(5)))
        .await;
    expect_closed(&mut alice).await;
}
