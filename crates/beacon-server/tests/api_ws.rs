use beacon_db::{create_pool, run_migrations, DbRuntimeSettings};
use beacon_server::{api_ws, app, config::Config, AppState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server(config: Config) -> (SocketAddr, AppState) {
    let pool = create_pool(":memory:", DbRuntimeSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
    }

    let state = AppState::new(pool, config);
    let app = app(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

async fn connect_and_subscribe(addr: SocketAddr, channel: &str) -> WsStream {
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("failed to connect");

    let subscribe = json!({"op": "subscribe", "channel": channel});
    ws.send(Message::Text(subscribe.to_string().into()))
        .await
        .expect("failed to send subscribe");

    // Give the server a moment to process the subscription.
    tokio::time::sleep(Duration::from_millis(100)).await;
    ws
}

/// Reads frames until one of the given type arrives, skipping heartbeats.
async fn next_frame_of_type(ws: &mut WsStream, frame_type: &str) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("transport error");
        if let Message::Text(text) = msg {
            let frame: Value = serde_json::from_str(&text).expect("frame should be JSON");
            if frame["type"] == frame_type {
                return frame;
            }
        }
    }
}

async fn post_incident(addr: SocketAddr, description: &str) -> Value {
    let response = reqwest::Client::new()
        .post(format!("http://{}/api/incidents", addr))
        .json(&json!({
            "type": "fire",
            "latitude": 14.5995,
            "longitude": 120.9842,
            "description": description
        }))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    response.json().await.expect("body should be JSON")
}

#[tokio::test]
async fn subscriber_receives_committed_incidents_in_order() {
    let (addr, _state) = start_server(Config::default()).await;
    let mut ws = connect_and_subscribe(addr, "incidents").await;

    let created = post_incident(addr, "first event").await;
    let frame = next_frame_of_type(&mut ws, "event").await;

    assert_eq!(frame["channel"], "incidents");
    assert_eq!(frame["sequence"], 1);
    assert_eq!(frame["event"]["kind"], "incident.reported");
    assert_eq!(frame["event"]["incident"]["id"], created["incident"]["id"]);
    assert_eq!(frame["event"]["incident"]["status"], "pending");

    let second = post_incident(addr, "second event").await;
    let frame = next_frame_of_type(&mut ws, "event").await;
    assert_eq!(frame["sequence"], 2, "sequences must be gapless");
    assert_eq!(frame["event"]["incident"]["id"], second["incident"]["id"]);
}

#[tokio::test]
async fn status_changes_are_broadcast() {
    let (addr, _state) = start_server(Config::default()).await;
    let mut ws = connect_and_subscribe(addr, "incidents").await;

    let created = post_incident(addr, "will be claimed").await;
    let id = created["incident"]["id"].as_str().unwrap();
    next_frame_of_type(&mut ws, "event").await; // the report itself

    let response = reqwest::Client::new()
        .patch(format!("http://{}/api/incidents/{}/status", addr, id))
        .json(&json!({"status": "in_progress"}))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let frame = next_frame_of_type(&mut ws, "event").await;
    assert_eq!(frame["sequence"], 2);
    assert_eq!(frame["event"]["kind"], "incident.status_changed");
    assert_eq!(frame["event"]["incident"]["status"], "in_progress");
}

#[tokio::test]
async fn unsubscribed_session_stops_receiving() {
    let (addr, _state) = start_server(Config::default()).await;
    let mut ws = connect_and_subscribe(addr, "incidents").await;

    post_incident(addr, "while subscribed").await;
    next_frame_of_type(&mut ws, "event").await;

    let unsubscribe = json!({"op": "unsubscribe", "channel": "incidents"});
    ws.send(Message::Text(unsubscribe.to_string().into()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    post_incident(addr, "after unsubscribe").await;

    let quiet = tokio::time::timeout(Duration::from_millis(500), ws.next()).await;
    assert!(
        quiet.is_err(),
        "no frame should arrive after unsubscribe, got {:?}",
        quiet
    );
}

#[tokio::test]
async fn malformed_frames_get_an_error_frame() {
    let (addr, _state) = start_server(Config::default()).await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    ws.send(Message::Text("not json at all".to_string().into()))
        .await
        .unwrap();
    let frame = next_frame_of_type(&mut ws, "error").await;
    assert!(frame["message"].is_string());

    // Invalid channel names are refused with an error frame too.
    let subscribe = json!({"op": "subscribe", "channel": ""});
    ws.send(Message::Text(subscribe.to_string().into()))
        .await
        .unwrap();
    let frame = next_frame_of_type(&mut ws, "error").await;
    assert!(frame["message"]
        .as_str()
        .unwrap()
        .contains("must not be empty"));
}

#[tokio::test]
async fn drained_session_is_notified_and_skipped_by_fanout() {
    let (addr, state) = start_server(Config::default()).await;
    let mut ws = connect_and_subscribe(addr, "incidents").await;
    assert_eq!(state.registry.session_count().await, 1);

    let drained = state.registry.drain_all(&api_ws::drain_frame_json()).await;
    assert_eq!(drained, 1);

    let frame = next_frame_of_type(&mut ws, "drain").await;
    assert!(frame["message"].as_str().unwrap().contains("reconnect"));

    // The write still succeeds; it just has nobody left to tell.
    post_incident(addr, "published while draining").await;
    let quiet = tokio::time::timeout(Duration::from_millis(500), ws.next()).await;
    assert!(quiet.is_err(), "draining sessions must not receive events");
}
