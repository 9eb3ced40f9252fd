//! Drives a real agent against a stub server socket: registration
//! handshake, telemetry cadence, command execution and shell sessions,
//! all over the actual wire format.

#![cfg(unix)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use fleet_agent::config::Config;
use fleet_agent::link::AgentLink;

type ServerSide = WebSocketStream<TcpStream>;

async fn start_agent() -> ServerSide {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = Config {
        server_url: format!("ws://{addr}/ws"),
        machine_id: "m-e2e".into(),
        heartbeat_interval_secs: 1,
        metrics_interval_secs: 1,
        reconnect_base_secs: 0,
        reconnect_cap_secs: 0,
        max_reconnect_attempts: 1,
        ..Default::default()
    };
    let link = AgentLink::new(config);
    tokio::spawn(async move {
        let _ = link.run().await;
    });

    let (stream, _) = tokio::time::timeout(Duration::from_secs(10), listener.accept())
        .await
        .expect("agent never connected")
        .unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn recv_json(ws: &mut ServerSide) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for agent frame")
            .expect("agent connection closed")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn recv_until(ws: &mut ServerSide, predicate: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..50 {
        let value = recv_json(ws).await;
        if predicate(&value) {
            return value;
        }
    }
    panic!("expected agent frame never arrived");
}

async fn send_json(ws: &mut ServerSide, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn register_is_the_first_frame_then_telemetry_flows() {
    let mut server = start_agent().await;

    let register = recv_json(&mut server).await;
    assert_eq!(register["type"], "register");
    assert!(!register["data"]["hostname"].as_str().unwrap().is_empty());
    assert!(register["data"]["total_memory"].as_u64().unwrap() > 0);

    // telemetry fires immediately, heartbeat after one period
    recv_until(&mut server, |v| v["type"] == "metrics").await;
    recv_until(&mut server, |v| v["type"] == "heartbeat").await;
}

#[tokio::test]
async fn dispatched_command_reports_both_phases() {
    let mut server = start_agent().await;
    recv_json(&mut server).await; // register

    send_json(
        &mut server,
        json!({
            "type": "execute_command",
            "commandId": "c-1",
            "commandType": "shell",
            "command": "echo hi"
        }),
    )
    .await;

    let executing = recv_until(&mut server, |v| v["type"] == "command_result").await;
    assert_eq!(executing["commandId"], "c-1");
    assert_eq!(executing["status"], "executing");

    let completed = recv_until(&mut server, |v| v["type"] == "command_result").await;
    assert_eq!(completed["status"], "completed");
    assert_eq!(completed["output"], "hi\n");
}

#[tokio::test]
async fn malformed_frames_do_not_break_the_connection() {
    let mut server = start_agent().await;
    recv_json(&mut server).await; // register

    send_json(&mut server, json!({ "type": "mystery", "beep": true })).await;
    send_json(
        &mut server,
        json!({
            "type": "execute_command",
            "commandId": "c-2",
            "commandType": "shell",
            "command": "echo still-alive"
        }),
    )
    .await;

    let completed = recv_until(&mut server, |v| {
        v["type"] == "command_result" && v["status"] == "completed"
    })
    .await;
    assert_eq!(completed["output"], "still-alive\n");
}

#[tokio::test]
async fn shell_session_survives_close_and_respawn() {
    let mut server = start_agent().await;
    recv_json(&mut server).await; // register

    send_json(
        &mut server,
        json!({ "type": "shell_input", "sessionId": "s-1", "input": "echo first-shell\n" }),
    )
    .await;
    let output = recv_until(&mut server, |v| {
        v["type"] == "shell_output" && v["output"].as_str().unwrap_or("").contains("first-shell")
    })
    .await;
    assert_eq!(output["sessionId"], "s-1");
    assert_eq!(output["isError"], false);

    // explicit close kills the subprocess without a terminal marker;
    // the same session id then gets a brand-new shell
    send_json(&mut server, json!({ "type": "close_shell", "sessionId": "s-1" })).await;
    send_json(
        &mut server,
        json!({ "type": "shell_input", "sessionId": "s-1", "input": "echo second-shell\n" }),
    )
    .await;

    let revived = recv_until(&mut server, |v| {
        v["type"] == "shell_output"
            && (v["output"].as_str().unwrap_or("").contains("second-shell")
                || v["isComplete"] == true)
    })
    .await;
    assert!(
        revived["output"].as_str().unwrap().contains("second-shell"),
        "stale terminal marker replayed: {revived}"
    );
}

#[tokio::test]
async fn file_listing_request_gets_a_reply() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("probe.txt"), b"x")
        .await
        .unwrap();

    let mut server = start_agent().await;
    recv_json(&mut server).await; // register

    send_json(
        &mut server,
        json!({
            "type": "get_file_listing",
            "requestId": "r-1",
            "path": dir.path().to_str().unwrap()
        }),
    )
    .await;

    let listing = recv_until(&mut server, |v| v["type"] == "file_listing").await;
    assert_eq!(listing["requestId"], "r-1");
    let files = listing["files"].as_array().unwrap();
    assert!(files.iter().any(|f| f["name"] == "probe.txt"));
}
