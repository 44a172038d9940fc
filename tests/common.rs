//! Common test harness utilities for integration tests.
//!
//! Spawns full runtimes on ephemeral loopback ports and provides
//! small WebSocket/HTTP client helpers for driving the protocol.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use pushgate::config::Config;
use pushgate::metrics::Metrics;
use pushgate::runtime::{Runtime, RuntimeAddrs};
use pushgate::time::SystemClock;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const BASE_CONFIG: &str = r#"
[server]
ws_bind = "127.0.0.1:0"
update_bind = "127.0.0.1:0"
hostname = "127.0.0.1"
"#;

pub struct TestServer {
    pub addrs: RuntimeAddrs,
    pub metrics: Arc<Metrics>,
    // Keeps the shutdown channel alive for the duration of the test.
    _runtime: Runtime<SystemClock>,
}

/// Start a runtime on ephemeral ports, applying `mutate` to the base
/// configuration first.
pub async fn spawn_server(mutate: impl FnOnce(&mut Config)) -> TestServer {
    let mut config: Config = toml::from_str(BASE_CONFIG).expect("base config");
    mutate(&mut config);
    let mut runtime = Runtime::new(config, SystemClock, None).expect("runtime");
    let addrs = runtime.start().await.expect("start runtime");
    TestServer {
        addrs,
        metrics: runtime.metrics(),
        _runtime: runtime,
    }
}

pub async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .expect("websocket connect");
    ws
}

pub async fn send_text(ws: &mut WsClient, text: &str) {
    ws.send(Message::Text(text.to_string().into()))
        .await
        .expect("send frame");
}

/// Receive the next text frame as JSON; panics after [`RECV_TIMEOUT`].
pub async fn recv_json(ws: &mut WsClient) -> Value {
    let deadline = timeout(RECV_TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(&text).expect("frame is json");
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => panic!("socket error: {err}"),
                None => panic!("socket closed while waiting for a frame"),
            }
        }
    })
    .await;
    deadline.expect("timed out waiting for a frame")
}

/// Assert that no text frame arrives within `dur`.
pub async fn expect_silence(ws: &mut WsClient, dur: Duration) {
    let result = timeout(dur, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => {
                    // closed counts as silence
                    futures_util::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    })
    .await;
    if let Ok(text) = result {
        panic!("expected silence, got frame {text}");
    }
}

/// Assert the connection closes without delivering another text frame.
pub async fn expect_closed(ws: &mut WsClient) {
    timeout(RECV_TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => panic!("unexpected frame before close: {text}"),
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return,
            }
        }
    })
    .await
    .expect("timed out waiting for close");
}

pub async fn hello(ws: &mut WsClient, uaid: &str, channel_ids: &[&str]) -> Value {
    let frame = json!({
        "messageType": "hello",
        "uaid": uaid,
        "channelIDs": channel_ids,
    });
    send_text(ws, &frame.to_string()).await;
    recv_json(ws).await
}

pub async fn register(ws: &mut WsClient, chid: &str) -> Value {
    let frame = json!({"messageType": "register", "channelID": chid});
    send_text(ws, &frame.to_string()).await;
    recv_json(ws).await
}

/// Publish a version to a minted endpoint; returns the HTTP status.
pub async fn put_update(endpoint: &str, version: i64) -> u16 {
    reqwest::Client::new()
        .put(endpoint)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(format!("version={version}"))
        .send()
        .await
        .expect("put update")
        .status()
        .as_u16()
}
