//! End-to-end protocol scenarios over real sockets.

mod common;

use common::*;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn fresh_client_gets_a_new_uaid() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;

    let reply = hello(&mut ws, "", &[]).await;
    assert_eq!(reply["messageType"], "hello");
    assert_eq!(reply["status"], 200);
    let uaid = reply["uaid"].as_str().unwrap();
    assert_eq!(uaid.len(), 32);
    assert!(pushgate::id::valid(uaid));

    // no backlog, so no notification follows
    expect_silence(&mut ws, Duration::from_millis(300)).await;
    assert_eq!(server.metrics.counter("updates.client.hello"), 1);
}

#[tokio::test]
async fn register_and_receive_an_update() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;
    hello(&mut ws, "", &[]).await;

    let reply = register(&mut ws, "abc123").await;
    assert_eq!(reply["status"], 200);
    assert_eq!(reply["channelID"], "abc123");
    let endpoint = reply["pushEndpoint"].as_str().unwrap().to_string();
    assert!(endpoint.starts_with("http://127.0.0.1:"));

    assert_eq!(put_update(&endpoint, 7).await, 200);
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["messageType"], "notification");
    assert_eq!(frame["updates"][0]["channelID"], "abc123");
    assert_eq!(frame["updates"][0]["version"], 7);
}

#[tokio::test]
async fn versions_are_monotone_per_channel() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;
    hello(&mut ws, "", &[]).await;
    let reply = register(&mut ws, "abc123").await;
    let endpoint = reply["pushEndpoint"].as_str().unwrap().to_string();

    assert_eq!(put_update(&endpoint, 7).await, 200);
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["updates"][0]["version"], 7);

    // older and equal versions are dropped silently
    assert_eq!(put_update(&endpoint, 5).await, 200);
    assert_eq!(put_update(&endpoint, 7).await, 200);
    expect_silence(&mut ws, Duration::from_millis(300)).await;

    assert_eq!(put_update(&endpoint, 8).await, 200);
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["updates"][0]["version"], 8);
}

#[tokio::test]
async fn ack_retires_pending_across_reconnect() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;
    let reply = hello(&mut ws, "", &[]).await;
    let uaid = reply["uaid"].as_str().unwrap().to_string();
    let reply = register(&mut ws, "abc123").await;
    let endpoint = reply["pushEndpoint"].as_str().unwrap().to_string();

    assert_eq!(put_update(&endpoint, 7).await, 200);
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["updates"][0]["version"], 7);

    let ack = json!({
        "messageType": "ack",
        "updates": [{"channelID": "abc123", "version": 7}],
    });
    send_text(&mut ws, &ack.to_string()).await;
    // the follow-on flush finds nothing pending
    expect_silence(&mut ws, Duration::from_millis(300)).await;
    ws.close(None).await.ok();

    let mut ws = connect(server.addrs.ws).await;
    let reply = hello(&mut ws, &uaid, &["abc123"]).await;
    assert_eq!(reply["status"], 200);
    assert_eq!(reply["uaid"].as_str().unwrap(), uaid);
    expect_silence(&mut ws, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn unknown_uaid_claiming_channels_is_reset() {
    let server = spawn_server(|_| {}).await;

    // a never-seen UAID with no channels is accepted as-is
    let suggested = pushgate::id::generate();
    let mut ws = connect(server.addrs.ws).await;
    let reply = hello(&mut ws, &suggested, &[]).await;
    assert_eq!(reply["uaid"].as_str().unwrap(), suggested);
    ws.close(None).await.ok();

    // claiming channels for a never-seen UAID is suspicious
    let suggested = pushgate::id::generate();
    let mut ws = connect(server.addrs.ws).await;
    let reply = hello(&mut ws, &suggested, &["aabb11"]).await;
    assert_eq!(reply["status"], 200);
    let issued = reply["uaid"].as_str().unwrap();
    assert_ne!(issued, suggested);
    assert!(pushgate::id::valid(issued));
}

#[tokio::test]
async fn rapid_pings_close_the_session() {
    let server = spawn_server(|c| c.client.min_ping_interval = 5).await;
    let mut ws = connect(server.addrs.ws).await;
    hello(&mut ws, "", &[]).await;

    send_text(&mut ws, r#"{"messageType":"ping"}"#).await;
    let reply = recv_json(&mut ws).await;
    assert!(reply.as_object().unwrap().is_empty());

    send_text(&mut ws, r#"{"messageType":"ping"}"#).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["status"], 401);
    assert!(reply["error"].as_str().unwrap().contains("pings"));
    expect_closed(&mut ws).await;
    assert_eq!(server.metrics.counter("updates.client.too_many_pings"), 1);
}

#[tokio::test]
async fn long_pongs_reply_with_a_full_frame() {
    let server = spawn_server(|c| c.push.long_pongs = true).await;
    let mut ws = connect(server.addrs.ws).await;
    hello(&mut ws, "", &[]).await;

    // the bare object is also a ping
    send_text(&mut ws, "{}").await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["messageType"], "ping");
    assert_eq!(reply["status"], 200);
}

#[tokio::test]
async fn hello_timeout_closes_silently() {
    let server = spawn_server(|c| c.socket.hello_timeout = Duration::from_millis(200)).await;
    let mut ws = connect(server.addrs.ws).await;
    // send nothing at all
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn second_hello_evicts_the_first_session() {
    let server = spawn_server(|_| {}).await;

    let mut first = connect(server.addrs.ws).await;
    let reply = hello(&mut first, "", &[]).await;
    let uaid = reply["uaid"].as_str().unwrap().to_string();
    let reply = register(&mut first, "abc123").await;
    let endpoint = reply["pushEndpoint"].as_str().unwrap().to_string();

    let mut second = connect(server.addrs.ws).await;
    let reply = hello(&mut second, &uaid, &["abc123"]).await;
    assert_eq!(reply["status"], 200);
    assert_eq!(reply["uaid"].as_str().unwrap(), uaid);

    // the first session is told to close
    expect_closed(&mut first).await;

    // updates published via the channel's endpoint now reach the
    // second session
    assert_eq!(put_update(&endpoint, 9).await, 200);
    let frame = recv_json(&mut second).await;
    assert_eq!(frame["messageType"], "notification");
    assert_eq!(frame["updates"][0]["version"], 9);
}

#[tokio::test]
async fn commands_before_hello_are_rejected() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;

    send_text(&mut ws, r#"{"messageType":"register","channelID":"abc123"}"#).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["messageType"], "register");
    assert_eq!(reply["status"], 401);
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn unknown_commands_are_rejected() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;
    hello(&mut ws, "", &[]).await;

    send_text(&mut ws, r#"{"messageType":"frobnicate"}"#).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["status"], 401);
    assert!(reply["error"].as_str().unwrap().contains("nknown"));
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn hello_without_channel_ids_is_rejected() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;

    send_text(&mut ws, r#"{"messageType":"hello","uaid":""}"#).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["status"], 401);
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn unregister_always_succeeds() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;
    hello(&mut ws, "", &[]).await;

    // never registered, storage knows nothing about it
    send_text(
        &mut ws,
        r#"{"messageType":"unregister","channelID":"abc123"}"#,
    )
    .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["messageType"], "unregister");
    assert_eq!(reply["status"], 200);
    assert_eq!(reply["channelID"], "abc123");
}

#[tokio::test]
async fn purge_is_a_noop() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;
    hello(&mut ws, "", &[]).await;

    send_text(&mut ws, r#"{"messageType":"purge"}"#).await;
    let reply = recv_json(&mut ws).await;
    assert!(reply.as_object().unwrap().is_empty());
}

#[tokio::test]
async fn redirect_answers_hello_with_302() {
    let server =
        spawn_server(|c| c.db.redirect = Some("wss://other.example.com".to_string())).await;
    let mut ws = connect(server.addrs.ws).await;

    send_text(
        &mut ws,
        r#"{"messageType":"hello","uaid":"","channelIDs":[]}"#,
    )
    .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["status"], 302);
    assert_eq!(reply["redirect"], "wss://other.example.com");
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn invalid_uaid_characters_are_rejected() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;

    let frame = json!({
        "messageType": "hello",
        "uaid": "not_hex!",
        "channelIDs": [],
    });
    send_text(&mut ws, &frame.to_string()).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["status"], 503);
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn invalid_channel_ids_are_rejected_on_register() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;
    hello(&mut ws, "", &[]).await;

    send_text(
        &mut ws,
        r#"{"messageType":"register","channelID":"bad_chid!"}"#,
    )
    .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["status"], 401);
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn stale_endpoints_return_not_found_routes() {
    let server = spawn_server(|_| {}).await;
    let url = format!("http://{}/update/@@@", server.addrs.update);
    // undecodable token
    let status = put_update(&url, 1).await;
    assert_eq!(status, 401);

    // unknown route
    let status = reqwest::Client::new()
        .get(format!("http://{}/nope", server.addrs.update))
        .send()
        .await
        .unwrap()
        .status()
        .as_u16();
    assert_eq!(status, 404);
}

#[tokio::test]
async fn update_ingress_rejects_bad_versions() {
    let server = spawn_server(|_| {}).await;
    let mut ws = connect(server.addrs.ws).await;
    hello(&mut ws, "", &[]).await;
    let reply = register(&mut ws, "abc123").await;
    let endpoint = reply["pushEndpoint"].as_str().unwrap().to_string();

    let status = reqwest::Client::new()
        .put(&endpoint)
        .header("content-type", "application/x-www-form-urlencoded")
        .body("version=seven")
        .send()
        .await
        .unwrap()
        .status()
        .as_u16();
    assert_eq!(status, 400);
}
