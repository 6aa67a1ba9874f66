//! End-to-end: a fake OneBot gateway talking to a running bridge

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use qqbridge::agent::{InvocationResult, ProcessRunner};
use qqbridge::{BridgeBuilder, BridgeConfig, BridgeState, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(10);

/// Answers every prompt with its reverse
#[derive(Default)]
struct ReverseRunner {
    calls: AtomicUsize,
}

#[async_trait]
impl ProcessRunner for ReverseRunner {
    async fn run_once(&self, payload: &str) -> Result<InvocationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reversed: String = payload.chars().rev().collect();
        Ok(InvocationResult::success(reversed, 0.0125))
    }
}

fn bridge_config(url: String) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.network.onebot_ws_url = url;
    config.network.reconnect_interval = 1;
    config.bot.chunk_delay_ms = 0;
    config
}

async fn fake_gateway() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("bridge did not connect")
        .unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn push(ws: &mut WebSocketStream<TcpStream>, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Next outbound action frame, skipping control frames
async fn next_action(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let message = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("no action from bridge")
            .expect("bridge closed the socket")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_private_message_round_trip() {
    let (listener, url) = fake_gateway().await;
    let runner = Arc::new(ReverseRunner::default());
    let bridge = BridgeBuilder::new()
        .config(bridge_config(url))
        .runner(runner.clone())
        .build()
        .unwrap();

    bridge.start().await.unwrap();
    let mut ws = accept(&listener).await;

    // Noise the bridge must ignore
    push(&mut ws, json!({"post_type": "meta_event", "meta_event_type": "heartbeat"})).await;
    ws.send(Message::Text("not json".to_string())).await.unwrap();

    push(
        &mut ws,
        json!({
            "post_type": "message",
            "message_type": "private",
            "sub_type": "friend",
            "user_id": 10001,
            "message": [{"type": "text", "data": {"text": "/claude abc"}}]
        }),
    )
    .await;

    let ack = next_action(&mut ws).await;
    assert_eq!(ack["action"], "send_private_msg");
    assert_eq!(ack["params"]["user_id"], 10001);
    assert_eq!(ack["params"]["message"], "Claude is thinking...");

    let reply = next_action(&mut ws).await;
    assert_eq!(reply["action"], "send_private_msg");
    assert_eq!(reply["params"]["message"], "cba\n\n[cost] $0.0125");
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

    let status = bridge.status().await;
    assert_eq!(status.state, BridgeState::Running);
    assert!(status.session.connected);
    assert!(status.session.last_heartbeat.is_some());
    assert_eq!(status.retry.stats.invocations, 1);

    bridge.stop().await.unwrap();
    assert_eq!(bridge.state().await, BridgeState::Stopped);
}

#[tokio::test]
async fn test_group_only_answers_when_addressed() {
    let (listener, url) = fake_gateway().await;
    let runner = Arc::new(ReverseRunner::default());
    let bridge = BridgeBuilder::new()
        .config(bridge_config(url))
        .runner(runner.clone())
        .build()
        .unwrap();

    bridge.start().await.unwrap();
    let mut ws = accept(&listener).await;

    let group_frame = |to_me: bool, text: &str| {
        json!({
            "post_type": "message",
            "message_type": "group",
            "sub_type": "normal",
            "user_id": 10001,
            "group_id": 20002,
            "to_me": to_me,
            "message": [
                {"type": "at", "data": {"qq": "123"}},
                {"type": "text", "data": {"text": text}}
            ]
        })
    };

    push(&mut ws, group_frame(false, "ignored")).await;
    push(&mut ws, group_frame(true, "xyz")).await;

    let ack = next_action(&mut ws).await;
    assert_eq!(ack["action"], "send_group_msg");
    assert_eq!(ack["params"]["group_id"], 20002);

    let reply = next_action(&mut ws).await;
    assert_eq!(reply["params"]["message"], "zyx\n\n[cost] $0.0125");
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconnects_after_gateway_restart() {
    let (listener, url) = fake_gateway().await;
    let bridge = BridgeBuilder::new()
        .config(bridge_config(url))
        .runner(Arc::new(ReverseRunner::default()))
        .build()
        .unwrap();

    bridge.start().await.unwrap();
    let mut ws = accept(&listener).await;
    ws.close(None).await.unwrap();
    drop(ws);

    // Bridge comes back on its own and keeps serving
    let mut ws = accept(&listener).await;
    push(
        &mut ws,
        json!({
            "post_type": "message",
            "message_type": "private",
            "sub_type": "friend",
            "user_id": 7,
            "message": "hello"
        }),
    )
    .await;

    let _ack = next_action(&mut ws).await;
    let reply = next_action(&mut ws).await;
    assert_eq!(reply["params"]["message"], "olleh\n\n[cost] $0.0125");

    bridge.stop().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_real_process_invoker_with_fake_cli() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::TempDir::new().unwrap();
    let script = dir.path().join("claude");
    std::fs::write(
        &script,
        "#!/bin/sh\nprintf '{\"success\":true,\"result\":\"pong\",\"cost_usd\":0}'\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let (listener, url) = fake_gateway().await;
    let mut config = bridge_config(url);
    config.claude.cli_path = script.to_string_lossy().into_owned();
    config.claude.work_dir = dir.path().join("work");
    config.bot.ack_message = String::new();

    let bridge = BridgeBuilder::new().config(config).build().unwrap();
    bridge.start().await.unwrap();
    let mut ws = accept(&listener).await;

    push(
        &mut ws,
        json!({
            "post_type": "message",
            "message_type": "private",
            "sub_type": "friend",
            "user_id": 1,
            "message": [{"type": "text", "data": {"text": "ping"}}]
        }),
    )
    .await;

    let reply = next_action(&mut ws).await;
    assert_eq!(reply["params"]["message"], "pong");

    bridge.stop().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_kills_running_cli() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::TempDir::new().unwrap();
    let started = dir.path().join("started");
    let finished = dir.path().join("finished");
    let script = dir.path().join("claude");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\ntouch '{}'\nsleep 2\ntouch '{}'\nprintf late\n",
            started.display(),
            finished.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let (listener, url) = fake_gateway().await;
    let mut config = bridge_config(url);
    config.claude.cli_path = script.to_string_lossy().into_owned();
    config.claude.work_dir = dir.path().join("work");
    config.bot.ack_message = String::new();

    let bridge = BridgeBuilder::new().config(config).build().unwrap();
    bridge.start().await.unwrap();
    let mut ws = accept(&listener).await;

    push(
        &mut ws,
        json!({
            "post_type": "message",
            "message_type": "private",
            "sub_type": "friend",
            "user_id": 3,
            "message": "take your time"
        }),
    )
    .await;

    tokio::time::timeout(WAIT, async {
        while !started.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("CLI never started");
    assert_eq!(bridge.status().await.in_flight, 1);

    tokio::time::timeout(WAIT, bridge.stop())
        .await
        .expect("stop hung while the CLI was running")
        .unwrap();
    assert_eq!(bridge.status().await.in_flight, 0);

    // The killed script never reaches its last step
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!finished.exists());
}
